//! Anonymous pipes: a small ring buffer shared between a read end and a
//! write end, each wrapped in a `File`. Closing either end wakes the
//! other so it can observe EOF or a broken pipe.

use crate::{
    fs::file::{filealloc, fileclose, File, FileKind},
    mem::virtual_memory::either_copyin,
    sync::spinlock::Spinlock,
};
use core::ptr::null_mut;

pub const PIPESIZE: usize = 512;

#[repr(C)]
pub struct Pipe {
    lock: Spinlock,
    data: [u8; PIPESIZE],
    /// Number of bytes read (mod PIPESIZE for the ring position).
    nread: u32,
    /// Number of bytes written (mod PIPESIZE for the ring position).
    nwrite: u32,
    /// Read fd is still open.
    readopen: bool,
    /// Write fd is still open.
    writeopen: bool,
}

/// Allocate a pipe and the read/write `File`s that refer to it.
/// On failure, frees whatever was partially allocated.
pub unsafe fn pipealloc(f0: &mut *mut File, f1: &mut *mut File) -> i32 {
    *f0 = null_mut();
    *f1 = null_mut();

    let pi = crate::mem::kalloc::kalloc() as *mut Pipe;
    if pi.is_null() {
        return -1;
    }

    *f0 = filealloc();
    *f1 = filealloc();
    if f0.is_null() || f1.is_null() || pi.is_null() {
        if !pi.is_null() {
            crate::mem::kalloc::kfree(pi.cast());
        }
        if !f0.is_null() {
            fileclose(*f0);
        }
        if !f1.is_null() {
            fileclose(*f1);
        }
        return -1;
    }

    core::ptr::write(
        pi,
        Pipe {
            lock: Spinlock::new(),
            data: [0; PIPESIZE],
            nread: 0,
            nwrite: 0,
            readopen: true,
            writeopen: true,
        },
    );

    let rf = &mut **f0;
    rf.kind = FileKind::Pipe;
    rf.readable = true;
    rf.writable = false;
    rf.pipe = pi;

    let wf = &mut **f1;
    wf.kind = FileKind::Pipe;
    wf.readable = false;
    wf.writable = true;
    wf.pipe = pi;

    0
}

pub unsafe fn pipeclose(pi: *mut Pipe, writable: bool) {
    let p = &mut *pi;
    let guard = p.lock.lock();
    if writable {
        p.writeopen = false;
        crate::proc::wakeup(core::ptr::addr_of!(p.nread).cast());
    } else {
        p.readopen = false;
        crate::proc::wakeup(core::ptr::addr_of!(p.nwrite).cast());
    }
    if !p.readopen && !p.writeopen {
        drop(guard);
        crate::mem::kalloc::kfree(pi.cast());
    }
}

pub unsafe fn pipewrite(pi: &mut Pipe, addr: u64, n: i32) -> i32 {
    let guard = pi.lock.lock();

    let mut written = 0i32;
    while written < n {
        if !pi.readopen || crate::proc::Process::current().unwrap().is_killed() {
            return -1;
        }
        if pi.nwrite == pi.nread + PIPESIZE as u32 {
            crate::proc::wakeup(core::ptr::addr_of!(pi.nread).cast());
            guard.sleep(core::ptr::addr_of!(pi.nwrite).cast_mut().cast());
            continue;
        }

        let mut ch = 0u8;
        if either_copyin(
            core::ptr::addr_of_mut!(ch),
            1,
            addr as usize + written as usize,
            1,
        ) == -1
        {
            break;
        }
        let idx = (pi.nwrite % PIPESIZE as u32) as usize;
        pi.data[idx] = ch;
        pi.nwrite += 1;
        written += 1;
    }

    crate::proc::wakeup(core::ptr::addr_of!(pi.nread).cast());
    written
}

pub unsafe fn piperead(pi: &mut Pipe, addr: u64, n: i32) -> i32 {
    let guard = pi.lock.lock();

    while pi.nread == pi.nwrite && pi.writeopen {
        if crate::proc::Process::current().unwrap().is_killed() {
            return -1;
        }
        guard.sleep(core::ptr::addr_of!(pi.nread).cast_mut().cast());
    }

    let mut read = 0i32;
    while read < n && pi.nread < pi.nwrite {
        let idx = (pi.nread % PIPESIZE as u32) as usize;
        pi.nread += 1;
        if crate::mem::virtual_memory::either_copyout(
            1,
            addr as usize + read as usize,
            core::ptr::addr_of_mut!(pi.data[idx]),
            1,
        ) == -1
        {
            break;
        }
        read += 1;
    }

    crate::proc::wakeup(core::ptr::addr_of!(pi.nwrite).cast());
    read
}
