use crate::{
    proc::{
        cpu::{mycpu, Cpu},
        scheduler,
    },
    trap::{pop_intr_off, push_intr_off},
};
use core::{
    cell::UnsafeCell,
    ffi::c_void,
    ptr::null_mut,
    sync::atomic::{AtomicBool, Ordering},
};

#[repr(C)]
pub struct Spinlock {
    pub locked: AtomicBool,
    cpu: UnsafeCell<*mut Cpu>,
}
unsafe impl Sync for Spinlock {}
impl Default for Spinlock {
    fn default() -> Spinlock {
        Spinlock::new()
    }
}
impl Spinlock {
    /// Initializes a `Spinlock`.
    pub const fn new() -> Spinlock {
        Spinlock {
            locked: AtomicBool::new(false),
            cpu: UnsafeCell::new(null_mut()),
        }
    }
    /// Check whether the current CPU holds the lock.
    ///
    /// Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && unsafe { *self.cpu.get() == mycpu() }
    }
    pub unsafe fn lock_unguarded(&self) {
        push_intr_off();

        if self.holding() {
            panic!("Spinlock: acquire twice by the same CPU");
        }

        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }

        *self.cpu.get() = mycpu();
    }
    pub fn lock(&self) -> SpinlockGuard<'_> {
        unsafe {
            self.lock_unguarded();
        }
        SpinlockGuard { lock: self }
    }
    pub unsafe fn unlock(&self) {
        if !self.holding() {
            panic!("Spinlock: release by a different CPU");
        }
        *self.cpu.get() = null_mut();

        self.locked.store(false, Ordering::Release);

        pop_intr_off();
    }
}

pub struct SpinlockGuard<'l> {
    pub lock: &'l Spinlock,
}
impl<'l> SpinlockGuard<'l> {
    /// Atomically release this lock and put the calling process to sleep on
    /// `chan`, reacquiring the lock before returning. Used to implement
    /// condition variables on top of a spinlock-protected invariant.
    pub unsafe fn sleep(&self, chan: *mut c_void) {
        scheduler::sleep_on(chan, self.lock);
    }
}
impl<'l> Drop for SpinlockGuard<'l> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}
