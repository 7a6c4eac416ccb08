//! The open file table: pipes, inodes, and character devices behind a
//! single reference-counted handle, the unit file descriptors point at.

use crate::{
    fs::{
        inode::{self, Inode},
        log::LogOperation,
        stat::Stat,
    },
    io::pipe::Pipe,
    mem::virtual_memory::either_copyout,
    sync::spinlock::Spinlock,
};
use core::ptr::null_mut;

pub type DevRead = fn(user_dst: i32, dst: u64, n: i32) -> i32;
pub type DevWrite = fn(user_src: i32, src: u64, n: i32) -> i32;

#[derive(Copy, Clone, Default)]
pub struct Devsw {
    pub read: Option<DevRead>,
    pub write: Option<DevWrite>,
}

pub const CONSOLE: usize = 1;

#[no_mangle]
pub static mut devsw: [Devsw; crate::NDEV] = [Devsw {
    read: None,
    write: None,
}; crate::NDEV];

#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    None,
    Pipe,
    Inode,
    Device,
}

#[repr(C)]
pub struct File {
    pub kind: FileKind,
    pub references: i32,
    pub readable: bool,
    pub writable: bool,
    pub pipe: *mut Pipe,
    pub ip: *mut Inode,
    pub off: u32,
    pub major: i16,
}
impl File {
    const fn new() -> File {
        File {
            kind: FileKind::None,
            references: 0,
            readable: false,
            writable: false,
            pipe: null_mut(),
            ip: null_mut(),
            off: 0,
            major: 0,
        }
    }
}

struct Ftable {
    lock: Spinlock,
    file: [File; crate::NFILE],
}
static mut FTABLE: Ftable = Ftable {
    lock: Spinlock::new(),
    file: [File::new(); crate::NFILE],
};

pub unsafe fn fileinit() {}

/// Allocate an unreferenced, unopened file in the table.
pub unsafe fn filealloc() -> *mut File {
    let _guard = FTABLE.lock.lock();
    for f in FTABLE.file.iter_mut() {
        if f.references == 0 {
            f.references = 1;
            return f;
        }
    }
    null_mut()
}

/// Increment the reference count on `f`, returning `f`.
pub unsafe fn filedup(f: *mut File) -> *mut File {
    let _guard = FTABLE.lock.lock();
    let fr = &mut *f;
    assert!(fr.references >= 1, "filedup: closed file");
    fr.references += 1;
    f
}

/// Drop a reference to `f`. If this was the last open reference, closes
/// the underlying pipe end or inode.
pub unsafe fn fileclose(f: *mut File) {
    let guard = FTABLE.lock.lock();
    let fr = &mut *f;
    assert!(fr.references >= 1, "fileclose: closed file");
    fr.references -= 1;
    if fr.references > 0 {
        return;
    }
    let kind = fr.kind;
    let pipe = fr.pipe;
    let ip = fr.ip;
    let writable = fr.writable;
    *fr = File::new();
    drop(guard);

    match kind {
        FileKind::Pipe => crate::io::pipe::pipeclose(pipe, writable),
        FileKind::Inode | FileKind::Device => {
            let _op = LogOperation::new();
            inode::iput(ip);
        }
        FileKind::None => {}
    }
}

/// Populate `*st` (a kernel or user address) with `f`'s metadata.
/// Only valid for inode- and device-backed files.
pub unsafe fn filestat(f: &mut File, addr: u64) -> i32 {
    if f.kind != FileKind::Inode && f.kind != FileKind::Device {
        return -1;
    }
    let ip = &mut *f.ip;
    let mut st = Stat::default();
    {
        let _guard = ip.lock();
        inode::stati(ip, &mut st);
    }
    if either_copyout(
        1,
        addr as usize,
        core::ptr::addr_of_mut!(st).cast(),
        core::mem::size_of::<Stat>() as u32,
    ) < 0
    {
        return -1;
    }
    0
}

/// Read up to `n` bytes from `f` into the user address `addr`.
pub unsafe fn fileread(f: &mut File, addr: u64, n: i32) -> i32 {
    if !f.readable {
        return -1;
    }

    match f.kind {
        FileKind::Pipe => crate::io::pipe::piperead(&mut *f.pipe, addr, n),
        FileKind::Device => {
            let Some(read) = devsw
                .get(f.major as usize)
                .and_then(|d| d.read)
            else {
                return -1;
            };
            read(1, addr, n)
        }
        FileKind::Inode => {
            let ip = &mut *f.ip;
            let r = {
                let _guard = ip.lock();
                inode::readi(ip, true, addr, f.off, n as u32)
            };
            if r > 0 {
                f.off += r as u32;
            }
            r
        }
        FileKind::None => -1,
    }
}

/// Write up to `n` bytes from the user address `addr` into `f`. Inode
/// writes are split into transaction-sized chunks so no single write
/// overflows the log.
pub unsafe fn filewrite(f: &mut File, addr: u64, n: i32) -> i32 {
    if !f.writable {
        return -1;
    }

    match f.kind {
        FileKind::Pipe => crate::io::pipe::pipewrite(&mut *f.pipe, addr, n),
        FileKind::Device => {
            let Some(write) = devsw
                .get(f.major as usize)
                .and_then(|d| d.write)
            else {
                return -1;
            };
            write(1, addr, n)
        }
        FileKind::Inode => {
            // Chunk writes so that (header + 1 block + 2 indirect * MAXFILE
            // worst-case) stays inside one transaction.
            let max = ((crate::MAXOPBLOCKS - 1 - 1 - 2) / 2) * crate::fs::BSIZE as usize;
            let mut total = 0i32;
            let mut err = false;
            while total < n && !err {
                let chunk = core::cmp::min((n - total) as usize, max) as i32;
                let ip = &mut *f.ip;
                let r = {
                    let _op = LogOperation::new();
                    let _guard = ip.lock();
                    inode::writei(ip, true, addr + total as u64, f.off, chunk as u32)
                };
                if r > 0 {
                    f.off += r as u32;
                }
                if r != chunk {
                    err = true;
                } else {
                    total += r;
                }
            }
            if err {
                -1
            } else {
                n
            }
        }
        FileKind::None => -1,
    }
}
