//! Buffer cache: a fixed-size pool of in-memory copies of disk blocks.
//!
//! Caches the `NBUF` most recently used blocks so the log and inode layers
//! don't have to hit the disk on every access. The cache-wide lock protects
//! only identity, refcount, and LRU bookkeeping; the contents of a buffer
//! are protected by that buffer's own sleeplock, so two unrelated blocks can
//! be read or written concurrently.

use crate::{io::buf::Buffer, sync::spinlock::Spinlock, virtio_disk, NBUF};
use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

struct Bcache {
    lock: Spinlock,
    buf: [Buffer; NBUF],
}

static TICK: AtomicU64 = AtomicU64::new(1);

static mut BCACHE: Bcache = Bcache {
    lock: Spinlock::new(),
    buf: [Buffer::new(); NBUF],
};

/// A locked, reference-counted handle to a cached block.
///
/// Dropping the handle unlocks the buffer and releases the cache's
/// reference to it; the block itself stays cached until evicted.
pub struct BufferHandle {
    buf: *mut Buffer,
}
impl BufferHandle {
    pub fn blockno(&self) -> u32 {
        unsafe { (*self.buf).blockno }
    }
    pub fn dev(&self) -> u32 {
        unsafe { (*self.buf).dev }
    }
    /// Increment the reference count without taking the per-block sleeplock.
    /// Used by the log to keep a block pinned across a transaction without
    /// holding its sleeplock for the whole operation.
    pub unsafe fn pin(&self) {
        let _g = BCACHE.lock.lock();
        (*self.buf).refcnt += 1;
    }
    pub unsafe fn unpin(&self) {
        let _g = BCACHE.lock.lock();
        (*self.buf).refcnt -= 1;
    }
}
impl Deref for BufferHandle {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        unsafe { &*self.buf }
    }
}
impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut Buffer {
        unsafe { &mut *self.buf }
    }
}
impl Drop for BufferHandle {
    fn drop(&mut self) {
        unsafe {
            let b = &mut *self.buf;
            debug_assert!(b.lock.holding(), "releasing a buffer we don't hold");
            b.lock.unlock();

            let _g = BCACHE.lock.lock();
            b.refcnt -= 1;
            if b.refcnt == 0 {
                b.last_used = TICK.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Look through the buffer cache for block `(dev, blockno)`.
/// If not found, recycle the least-recently-used unreferenced buffer.
unsafe fn bget(dev: u32, blockno: u32) -> BufferHandle {
    let guard = BCACHE.lock.lock();

    for b in BCACHE.buf.iter_mut() {
        if b.dev == dev && b.blockno == blockno {
            b.refcnt += 1;
            core::mem::drop(guard);
            b.lock.lock_unguarded();
            return BufferHandle { buf: b };
        }
    }

    let mut victim: Option<*mut Buffer> = None;
    let mut oldest = u64::MAX;
    for b in BCACHE.buf.iter_mut() {
        if b.refcnt == 0 && b.last_used <= oldest {
            oldest = b.last_used;
            victim = Some(b);
        }
    }
    let b = &mut *victim.expect("bget: no free buffers");
    b.dev = dev;
    b.blockno = blockno;
    b.valid = false;
    b.refcnt = 1;
    core::mem::drop(guard);
    b.lock.lock_unguarded();
    BufferHandle { buf: b }
}

/// Return a locked buffer with the contents of the given block.
pub unsafe fn bread(dev: u32, blockno: u32) -> BufferHandle {
    let mut h = bget(dev, blockno);
    if !h.valid {
        virtio_disk::read(&mut h);
        h.valid = true;
    }
    h
}

/// Write a buffer's contents to disk. Caller must hold the buffer's lock.
pub unsafe fn bwrite(b: &mut BufferHandle) {
    virtio_disk::write(b);
}
