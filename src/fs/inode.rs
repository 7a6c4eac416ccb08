//! In-memory inode cache.
//!
//! An `Inode` in this cache can be in one of a few states:
//! allocated-but-not-referenced (not in this file at all), referenced
//! but not locked (`references > 0`, cached copy of the on-disk inode
//! may be stale), or locked (cached copy guaranteed up to date, caller
//! may read/modify `kind`/`size`/`addrs`/...).
//!
//! `iget` finds or creates a cache entry and bumps its reference count
//! without locking it, so callers can hold a long-lived reference
//! (e.g. `Process::cwd`) without blocking concurrent access by others.
//! `ilock`/`iunlock` (or the `InodeLockGuard` wrapper) bracket the
//! actual reads of inode content.

use super::stat::Stat;
use crate::{
    fs::{bio, log, DiskInode, DirectoryEntry, DIRSIZ, IPB, NDIRECT, NINDIRECT},
    mem::{memmove, memset},
    sync::sleeplock::Sleeplock,
};
use core::{ptr::addr_of_mut, sync::atomic::{AtomicI32, Ordering}};

#[repr(C)]
pub struct Inode {
    /// Device number.
    pub device: u32,
    /// Inode number.
    pub inum: u32,
    /// Reference count.
    pub references: AtomicI32,

    pub lock: Sleeplock,
    /// Inode has been read from disk?
    pub valid: bool,

    // Copy of DiskInode.
    pub kind: i16,
    pub major: i16,
    pub minor: i16,
    pub num_links: i16,
    pub size: u32,
    pub addresses: [u32; NDIRECT + 1],
}
impl Inode {
    const fn new() -> Inode {
        Inode {
            device: 0,
            inum: 0,
            references: AtomicI32::new(0),
            lock: Sleeplock::new(),
            valid: false,
            kind: 0,
            major: 0,
            minor: 0,
            num_links: 0,
            size: 0,
            addresses: [0; NDIRECT + 1],
        }
    }
    pub fn lock(&mut self) -> InodeLockGuard<'_> {
        InodeLockGuard::new(self)
    }
}

pub struct InodeLockGuard<'i> {
    pub inode: &'i mut Inode,
}
impl<'i> InodeLockGuard<'i> {
    pub fn new(inode: &mut Inode) -> InodeLockGuard<'_> {
        unsafe { ilock(inode) };
        InodeLockGuard { inode }
    }
}
impl<'i> core::ops::Drop for InodeLockGuard<'i> {
    fn drop(&mut self) {
        unsafe { iunlock(self.inode) };
    }
}

const NINODE: usize = crate::NINODE;

struct Icache {
    lock: crate::sync::spinlock::Spinlock,
    inode: [Inode; NINODE],
}
static mut ICACHE: Icache = Icache {
    lock: crate::sync::spinlock::Spinlock::new(),
    inode: [Inode::new(); NINODE],
};

pub unsafe fn iinit() {}

/// Allocate an inode of the given type on `dev`. Marks it allocated by
/// giving it type `kind` on disk, then returns an unlocked but
/// referenced in-memory copy via [`iget`].
pub unsafe fn ialloc(dev: u32, kind: i16) -> *mut Inode {
    for inum in 1..super::SB.ninodes {
        let mut buf = bio::bread(dev, super::iblock(inum, &super::SB));
        let dip: &mut DiskInode =
            &mut *buf.data.as_mut_ptr().add((inum % IPB) as usize * core::mem::size_of::<DiskInode>()).cast();
        if dip.kind == 0 {
            memset(addr_of_mut!(*dip).cast(), 0, core::mem::size_of::<DiskInode>() as u32);
            dip.kind = kind;
            log::log_write(&buf);
            drop(buf);
            return iget(dev, inum);
        }
    }
    panic!("ialloc: no inodes");
}

/// Write a modified in-memory inode's cached fields back to disk.
/// Must be called after every change to an `Inode`'s content fields.
pub unsafe fn iupdate(ip: &mut Inode) {
    let mut buf = bio::bread(ip.device, super::iblock(ip.inum, &super::SB));
    let dip: &mut DiskInode =
        &mut *buf.data.as_mut_ptr().add((ip.inum % IPB) as usize * core::mem::size_of::<DiskInode>()).cast();
    dip.kind = ip.kind;
    dip.major = ip.major;
    dip.minor = ip.minor;
    dip.nlink = ip.num_links;
    dip.size = ip.size;
    dip.addrs = ip.addresses;
    log::log_write(&buf);
}

/// Find the in-memory inode for `(dev, inum)`, allocating a cache slot
/// and bumping its reference count if not already cached.
pub unsafe fn iget(dev: u32, inum: u32) -> *mut Inode {
    let _guard = ICACHE.lock.lock();

    let mut empty: *mut Inode = core::ptr::null_mut();
    for ip in ICACHE.inode.iter_mut() {
        if ip.references.load(Ordering::Relaxed) > 0 && ip.device == dev && ip.inum == inum {
            ip.references.fetch_add(1, Ordering::Relaxed);
            return ip;
        }
        if empty.is_null() && ip.references.load(Ordering::Relaxed) == 0 {
            empty = ip;
        }
    }

    if empty.is_null() {
        panic!("iget: no inodes");
    }

    let ip = &mut *empty;
    ip.device = dev;
    ip.inum = inum;
    ip.references.store(1, Ordering::Relaxed);
    ip.valid = false;
    ip
}

/// Increment the reference count on `ip`, returning `ip`.
pub unsafe fn idup(ip: *mut Inode) -> *mut Inode {
    let _guard = ICACHE.lock.lock();
    (*ip).references.fetch_add(1, Ordering::Relaxed);
    ip
}

/// Lock the inode, reading it from disk if it is not already valid.
pub unsafe fn ilock(ip: *mut Inode) {
    let ip = &mut *ip;
    assert!(ip.references.load(Ordering::Relaxed) > 0, "ilock on unreferenced inode");
    ip.lock.lock_unguarded();

    if !ip.valid {
        let buf = bio::bread(ip.device, super::iblock(ip.inum, &super::SB));
        let dip: &DiskInode =
            &*buf.data.as_ptr().add((ip.inum % IPB) as usize * core::mem::size_of::<DiskInode>()).cast();
        ip.kind = dip.kind;
        ip.major = dip.major;
        ip.minor = dip.minor;
        ip.num_links = dip.nlink;
        ip.size = dip.size;
        ip.addresses = dip.addrs;
        drop(buf);
        ip.valid = true;
        if ip.kind == 0 {
            panic!("ilock: no type");
        }
    }
}

pub unsafe fn iunlock(ip: *mut Inode) {
    let ip = &mut *ip;
    assert!(ip.lock.holding(), "iunlock");
    assert!(ip.references.load(Ordering::Relaxed) > 0, "iunlock on unreferenced inode");
    ip.lock.unlock();
}

/// Drop a reference to an in-memory inode. If this was the last
/// reference and the inode has no links, free it on disk.
pub unsafe fn iput(ip: *mut Inode) {
    let ip = &mut *ip;

    let guard = ICACHE.lock.lock();
    if ip.references.load(Ordering::Relaxed) == 1 && ip.valid && ip.num_links == 0 {
        // No other references, and no directory entries to it either:
        // truncate and free.
        drop(guard);
        ip.lock.lock_unguarded();
        itrunc(ip);
        ip.kind = 0;
        iupdate(ip);
        ip.valid = false;
        ip.lock.unlock();
        let _guard = ICACHE.lock.lock();
    }
    ip.references.fetch_sub(1, Ordering::Relaxed);
}

pub unsafe fn iunlockput(ip: *mut Inode) {
    iunlock(ip);
    iput(ip);
}

/// Map the logical block number `bn` (within the file) to its disk
/// block number, allocating a block (or indirect block) if needed.
unsafe fn bmap(ip: &mut Inode, bn: u32) -> u32 {
    let bn = bn as usize;

    if bn < NDIRECT {
        if ip.addresses[bn] == 0 {
            ip.addresses[bn] = balloc(ip.device);
        }
        return ip.addresses[bn];
    }

    let bn = bn - NDIRECT;
    if bn < NINDIRECT {
        if ip.addresses[NDIRECT] == 0 {
            ip.addresses[NDIRECT] = balloc(ip.device);
        }
        let mut indirect_buf = bio::bread(ip.device, ip.addresses[NDIRECT]);
        let table: &mut [u32; NINDIRECT] = &mut *indirect_buf.data.as_mut_ptr().cast();
        if table[bn] == 0 {
            table[bn] = balloc(ip.device);
            log::log_write(&indirect_buf);
        }
        return table[bn];
    }

    panic!("bmap: out of range");
}

/// Truncate the inode's data to zero bytes, freeing every data block
/// (direct and indirect) it owns.
pub unsafe fn itrunc(ip: &mut Inode) {
    for addr in ip.addresses.iter_mut().take(NDIRECT) {
        if *addr != 0 {
            bfree(ip.device, *addr);
            *addr = 0;
        }
    }

    if ip.addresses[NDIRECT] != 0 {
        let indirect_buf = bio::bread(ip.device, ip.addresses[NDIRECT]);
        let table: &[u32; NINDIRECT] = &*indirect_buf.data.as_ptr().cast();
        for &block in table.iter() {
            if block != 0 {
                bfree(ip.device, block);
            }
        }
        drop(indirect_buf);
        bfree(ip.device, ip.addresses[NDIRECT]);
        ip.addresses[NDIRECT] = 0;
    }

    ip.size = 0;
    iupdate(ip);
}

pub unsafe fn stati(ip: &Inode, st: &mut Stat) {
    st.device = ip.device as i32;
    st.inode = ip.inum;
    st.kind = ip.kind;
    st.num_links = ip.num_links;
    st.size = ip.size as u64;
}

/// Read `n` bytes from `ip` at offset `off` into `dst`, a user address
/// if `user_dst` and a kernel address otherwise. Returns bytes read, or
/// -1 on error.
pub unsafe fn readi(ip: &mut Inode, user_dst: bool, dst: u64, off: u32, n: u32) -> i32 {
    if off > ip.size || off.checked_add(n).is_none() {
        return -1;
    }
    let n = if off + n > ip.size { ip.size - off } else { n };

    let mut total = 0u32;
    let mut dst = dst;
    while total < n {
        let buf = bio::bread(ip.device, bmap(ip, (off + total) / super::BSIZE));
        let block_off = (off + total) % super::BSIZE;
        let m = core::cmp::min(n - total, super::BSIZE - block_off);

        let src = buf.data.as_ptr().add(block_off as usize);
        if user_dst {
            if crate::mem::virtual_memory::copyout(
                crate::proc::process::Process::current().unwrap().pagetable,
                dst,
                src.cast_mut(),
                m as u64,
            ) < 0
            {
                drop(buf);
                break;
            }
        } else {
            memmove(dst as *mut u8, src, m);
        }

        total += m;
        dst += m as u64;
    }
    total as i32
}

/// Write `n` bytes from `src` to `ip` at offset `off`. Extends the file
/// (and grows the indirect block chain) as needed, up to `MAXFILE`
/// blocks. Returns bytes written, or -1 on error.
pub unsafe fn writei(ip: &mut Inode, user_src: bool, src: u64, off: u32, n: u32) -> i32 {
    if off > ip.size || off.checked_add(n).is_none() {
        return -1;
    }
    if off as usize + n as usize > super::MAXFILE * super::BSIZE as usize {
        return -1;
    }

    let mut total = 0u32;
    let mut src = src;
    while total < n {
        let mut buf = bio::bread(ip.device, bmap(ip, (off + total) / super::BSIZE));
        let block_off = (off + total) % super::BSIZE;
        let m = core::cmp::min(n - total, super::BSIZE - block_off);

        let dst = buf.data.as_mut_ptr().add(block_off as usize);
        if user_src {
            if crate::mem::virtual_memory::copyin(
                crate::proc::process::Process::current().unwrap().pagetable,
                dst,
                src as usize,
                m as u64,
            ) < 0
            {
                drop(buf);
                break;
            }
        } else {
            memmove(dst, src as *const u8, m);
        }

        log::log_write(&buf);
        drop(buf);

        total += m;
        src += m as u64;
    }

    if total > 0 && off + total > ip.size {
        ip.size = off + total;
    }
    iupdate(ip);
    total as i32
}

unsafe fn balloc(dev: u32) -> u32 {
    for block in (0..super::SB.size).step_by(super::BPB as usize) {
        let mut buf = bio::bread(dev, super::bblock(block, &super::SB));
        for bit in 0..core::cmp::min(super::BPB, super::SB.size - block) {
            let mask = 1u8 << (bit % 8);
            let byte = &mut buf.data[(bit / 8) as usize];
            if *byte & mask == 0 {
                *byte |= mask;
                log::log_write(&buf);
                let bno = block + bit;
                let mut zero = bio::bread(dev, bno);
                zero.data.fill(0);
                log::log_write(&zero);
                return bno;
            }
        }
    }
    panic!("balloc: out of blocks");
}

unsafe fn bfree(dev: u32, b: u32) {
    let mut buf = bio::bread(dev, super::bblock(b, &super::SB));
    let bit = b % super::BPB;
    let mask = 1u8 << (bit % 8);
    let byte = &mut buf.data[(bit / 8) as usize];
    assert!(*byte & mask != 0, "bfree: freeing free block");
    *byte &= !mask;
    log::log_write(&buf);
}

const _: () = assert!(core::mem::size_of::<DirectoryEntry>() == DIRSIZ + 2);
