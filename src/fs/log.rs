//! Crash-consistent logging layer.
//!
//! A simple form of write-ahead logging. Each system call that writes
//! disk blocks wraps its writes between `begin_op`/`end_op`. The log
//! commits all of a transaction's blocks to a fixed region of disk at
//! once, then installs them at their home locations; recovery after a
//! crash replays any committed-but-not-installed transaction.
//!
//! Only one transaction may be committing at a time, and `begin_op`
//! refuses to let an operation start if it might not fit in the log by
//! itself, so `commit` never needs to run with other writes in flight.

use crate::{
    fs::{bio, BSIZE},
    io::buf::BufferHandle,
    sync::spinlock::Spinlock,
};

#[repr(C)]
pub struct LogHeader {
    pub n: i32,
    pub blocks: [u32; crate::LOGSIZE],
}

struct Log {
    start: u32,
    size: i32,
    /// How many FS syscalls are currently executing.
    outstanding: i32,
    /// Someone is in commit(), please wait.
    committing: bool,
    dev: u32,
    header: LogHeader,
}

static LOCK: Spinlock = Spinlock::new();
static mut LOG: Log = Log {
    start: 0,
    size: 0,
    outstanding: 0,
    committing: false,
    dev: 0,
    header: LogHeader {
        n: 0,
        blocks: [0; crate::LOGSIZE],
    },
};

unsafe fn read_head() {
    let buf = bio::bread(LOG.dev, LOG.start);
    let hdr: &LogHeader = &*(buf.data.as_ptr().cast());
    LOG.header.n = hdr.n;
    for i in 0..hdr.n as usize {
        LOG.header.blocks[i] = hdr.blocks[i];
    }
}

/// This is the commit/recovery point: once the on-disk header names the
/// blocks of a transaction, install_trans (on recovery) or the rest of
/// commit() will finish copying them out.
unsafe fn write_head() {
    let mut buf = bio::bread(LOG.dev, LOG.start);
    let hdr: &mut LogHeader = &mut *(buf.data.as_mut_ptr().cast());
    hdr.n = LOG.header.n;
    for i in 0..LOG.header.n as usize {
        hdr.blocks[i] = LOG.header.blocks[i];
    }
    bio::bwrite(&mut buf);
}

/// Copy committed blocks from the log to their home locations.
unsafe fn install_trans(recovering: bool) {
    for tail in 0..LOG.header.n as usize {
        let log_buf = bio::bread(LOG.dev, LOG.start + tail as u32 + 1);
        let mut dst_buf = bio::bread(LOG.dev, LOG.header.blocks[tail]);
        dst_buf.data.copy_from_slice(&log_buf.data);
        bio::bwrite(&mut dst_buf);
        if !recovering {
            dst_buf.unpin();
        }
    }
}

pub unsafe fn init(dev: u32) {
    assert!(core::mem::size_of::<LogHeader>() <= BSIZE as usize);

    LOG.start = super::SB.logstart;
    LOG.size = super::SB.nlog as i32;
    LOG.dev = dev;

    recover_from_log();
}

unsafe fn recover_from_log() {
    read_head();
    install_trans(true);
    LOG.header.n = 0;
    write_head();
}

/// Called at the start of each FS system call.
pub unsafe fn begin_op() {
    let guard = LOCK.lock();
    loop {
        if LOG.committing {
            guard.sleep(core::ptr::addr_of!(LOG).cast_mut().cast());
        } else if LOG.header.n as usize + (LOG.outstanding as usize + 1) * crate::MAXOPBLOCKS
            > crate::LOGSIZE
        {
            // This op might exhaust log space; wait for commit().
            guard.sleep(core::ptr::addr_of!(LOG).cast_mut().cast());
        } else {
            LOG.outstanding += 1;
            break;
        }
    }
}

/// Called at the end of each FS system call. Commits if this was the
/// last outstanding operation.
pub unsafe fn end_op() {
    let mut do_commit = false;

    {
        let _guard = LOCK.lock();
        LOG.outstanding -= 1;
        assert!(!LOG.committing, "log.committing during end_op");
        if LOG.outstanding == 0 {
            do_commit = true;
            LOG.committing = true;
        } else {
            crate::proc::wakeup(core::ptr::addr_of!(LOG).cast_mut().cast());
        }
    }

    if do_commit {
        commit();
        let _guard = LOCK.lock();
        LOG.committing = false;
        crate::proc::wakeup(core::ptr::addr_of!(LOG).cast_mut().cast());
    }
}

unsafe fn write_log() {
    for tail in 0..LOG.header.n as usize {
        let mut to = bio::bread(LOG.dev, LOG.start + tail as u32 + 1);
        let from = bio::bread(LOG.dev, LOG.header.blocks[tail]);
        to.data.copy_from_slice(&from.data);
        bio::bwrite(&mut to);
    }
}

unsafe fn commit() {
    if LOG.header.n > 0 {
        write_log();
        write_head();
        install_trans(false);
        LOG.header.n = 0;
        write_head();
    }
}

/// Record a block to be written back as part of the current
/// transaction. The buffer is not written immediately; it is pinned in
/// the cache and copied to the log when the transaction commits.
pub unsafe fn log_write(b: &BufferHandle) {
    let _guard = LOCK.lock();

    assert!(
        (LOG.header.n as usize) < crate::LOGSIZE && LOG.header.n < LOG.size - 1,
        "too big a transaction"
    );
    assert!(LOG.outstanding > 0, "log_write outside of a transaction");

    for i in 0..LOG.header.n as usize {
        if LOG.header.blocks[i] == b.blockno() {
            return; // already in the transaction.
        }
    }
    let n = LOG.header.n as usize;
    LOG.header.blocks[n] = b.blockno();
    LOG.header.n += 1;
    b.pin();
}

/// RAII guard for a file-system transaction: begins on construction,
/// ends on drop. Used in place of manual `begin_op`/`end_op` pairs.
pub struct LogOperation;
impl LogOperation {
    pub fn new() -> LogOperation {
        unsafe { begin_op() };
        LogOperation
    }
}
impl Default for LogOperation {
    fn default() -> LogOperation {
        LogOperation::new()
    }
}
impl Drop for LogOperation {
    fn drop(&mut self) {
        unsafe { end_op() };
    }
}
