//! A lock that puts the calling process to sleep instead of spinning when
//! contended. Used for long-lived critical sections such as disk I/O, where
//! busy-waiting on a spinlock would hog the CPU and (since spinlocks disable
//! interrupts) deadlock the device interrupt handler that completes the I/O.

use crate::proc::process::Process;
use core::{
    ptr::addr_of,
    sync::atomic::{AtomicBool, AtomicI32, Ordering},
};

#[repr(C)]
pub struct Sleeplock {
    locked: AtomicBool,
    /// Guards `locked` + `pid` against the sleep/wakeup race; this is the
    /// `lk` handed off in the classic sleep(chan, lk) protocol.
    guard: crate::sync::spinlock::Spinlock,
    /// Process holding the lock, for debugging.
    pid: AtomicI32,
}
impl Sleeplock {
    pub const fn new() -> Sleeplock {
        Sleeplock {
            locked: AtomicBool::new(false),
            guard: crate::sync::spinlock::Spinlock::new(),
            pid: AtomicI32::new(0),
        }
    }
    pub unsafe fn lock_unguarded(&self) {
        let g = self.guard.lock();
        while self.locked.load(Ordering::Acquire) {
            g.sleep(addr_of!(*self).cast_mut().cast());
        }
        self.locked.store(true, Ordering::Release);
        if let Some(p) = Process::current() {
            self.pid.store(p.pid, Ordering::Relaxed);
        }
    }
    pub fn lock(&self) -> SleeplockGuard<'_> {
        unsafe {
            self.lock_unguarded();
        }
        SleeplockGuard { lock: self }
    }
    pub unsafe fn unlock(&self) {
        let _g = self.guard.lock();
        self.locked.store(false, Ordering::Release);
        self.pid.store(0, Ordering::Relaxed);
        crate::proc::wakeup(addr_of!(*self).cast_mut().cast());
    }
    /// Returns true if the calling code already holds this lock.
    pub fn holding(&self) -> bool {
        let _g = self.guard.lock();
        self.locked.load(Ordering::Acquire)
            && Process::current().map(|p| p.pid) == Some(self.pid.load(Ordering::Relaxed))
    }
}
impl Default for Sleeplock {
    fn default() -> Sleeplock {
        Sleeplock::new()
    }
}

pub struct SleeplockGuard<'l> {
    pub lock: &'l Sleeplock,
}
impl<'l> Drop for SleeplockGuard<'l> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}
