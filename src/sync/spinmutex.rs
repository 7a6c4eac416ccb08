use crate::proc::cpu::{mycpu, Cpu};
use core::{
    cell::UnsafeCell,
    convert::{AsMut, AsRef},
    ops::{Deref, DerefMut, Drop},
    ptr::null_mut,
    sync::atomic::{AtomicBool, Ordering},
};

pub struct SpinMutex<T> {
    locked: AtomicBool,
    cpu: UnsafeCell<*mut Cpu>,
    pub inner: UnsafeCell<T>,
}
impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> SpinMutex<T> {
        SpinMutex {
            locked: AtomicBool::new(false),
            cpu: UnsafeCell::new(null_mut()),
            inner: UnsafeCell::new(value),
        }
    }
    /// Check whether the current CPU holds the mutex.
    ///
    /// Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && unsafe { *self.cpu.get() == mycpu() }
    }
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        unsafe {
            self.lock_unguarded();
        }
        SpinMutexGuard { mutex: self }
    }
    /// Lock without producing a guard, for callers (like [`sleep`'s
    /// wakeup protocol](SpinMutexGuard::sleep)) that need to reacquire
    /// a lock they already hold a guard for.
    pub unsafe fn lock_unguarded(&self) {
        crate::trap::push_intr_off();

        if self.holding() {
            panic!("SpinMutex: acquire twice by the same CPU");
        }

        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }

        *self.cpu.get() = mycpu();
    }
    pub unsafe fn unlock(&self) {
        if !self.holding() {
            panic!("SpinMutex: release by a different CPU");
        }
        *self.cpu.get() = null_mut();

        self.locked.store(false, Ordering::Release);

        unsafe {
            crate::trap::pop_intr_off();
        }
    }
}
unsafe impl<T> Sync for SpinMutex<T> where T: Send {}

pub struct SpinMutexGuard<'m, T> {
    pub mutex: &'m SpinMutex<T>,
}
impl<'m, T> Deref for SpinMutexGuard<'m, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<'m, T> DerefMut for SpinMutexGuard<'m, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<'m, T> AsRef<T> for SpinMutexGuard<'m, T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}
impl<'m, T> AsMut<T> for SpinMutexGuard<'m, T> {
    fn as_mut(&mut self) -> &mut T {
        self.deref_mut()
    }
}
impl<'m, T> Drop for SpinMutexGuard<'m, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.unlock() }
    }
}
impl<'m, T> SpinMutexGuard<'m, T> {
    /// Atomically release the mutex and sleep on `chan`, reacquiring it
    /// once woken. See [`crate::sync::spinlock::SpinlockGuard::sleep`].
    pub unsafe fn sleep(&self, chan: *mut core::ffi::c_void) {
        crate::proc::scheduler::sleep_on_mutex(chan, self.mutex);
    }
}