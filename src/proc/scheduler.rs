use super::{
    context::Context,
    cpu::Cpu,
    process::{Process, ProcessState},
};
use crate::{
    arch::riscv::intr_get,
    sync::{spinlock::Spinlock, spinmutex::SpinMutex},
};
use core::{
    ffi::c_void,
    ptr::{addr_of_mut, null_mut},
};

extern "C" {
    pub fn swtch(a: *mut Context, b: *mut Context);
}

/// Wake up all processes sleeping on `chan`.
///
/// Must be called without any p->lock held, since it acquires every
/// process's lock in turn.
pub unsafe fn wakeup(chan: *const c_void) {
    for p in super::process::proc.iter_mut() {
        if !p.is_current() {
            let _guard = p.lock.lock();
            if p.state == ProcessState::Sleeping && p.chan == chan.cast_mut() {
                p.state = ProcessState::Runnable;
            }
        }
    }
}

/// Per-CPU process scheduler. Each CPU calls scheduler() after setting
/// itself up, and never returns. It loops, doing:
///
///  - choose a process to run
///  - swtch to start running that process
///  - eventually that process transfers control back via swtch to the scheduler
#[no_mangle]
pub unsafe extern "C" fn scheduler() -> ! {
    let cpu = Cpu::current();
    cpu.proc = null_mut();

    loop {
        // Avoid deadlock by ensuring devices can interrupt.
        crate::arch::riscv::intr_on();

        let mut found = false;

        for p in super::process::proc.iter_mut() {
            let guard = p.lock.lock();

            if p.state == ProcessState::Runnable {
                found = true;

                // Switch to chosen process. It is the process's job to
                // release its lock and then reacquire it before jumping
                // back to us.
                p.state = ProcessState::Running;
                cpu.proc = addr_of_mut!(*p);

                swtch(addr_of_mut!(cpu.context), addr_of_mut!(p.context));

                // Process is done running for now.
                cpu.proc = null_mut();
            }

            core::mem::drop(guard);
        }

        if !found {
            // Nothing to run; idle until the next interrupt instead of
            // spinning the hart at 100%.
            crate::arch::riscv::wfi();
        }
    }
}

/// Give up the CPU for one scheduling round.
pub unsafe fn r#yield() {
    let p = Process::current().unwrap();
    let _guard = p.lock.lock();
    p.state = ProcessState::Runnable;
    sched();
}

/// Switch to scheduler.  Must hold only p->lock
/// and have changed proc->state. Saves and restores
/// previous_interrupts_enabled because previous_interrupts_enabled is a property of this
/// kernel thread, not this CPU. It should
/// be proc->previous_interrupts_enabled and proc->interrupt_disable_layers, but that would
/// break in the few places where a lock is held but
/// there's no process.
#[no_mangle]
pub unsafe extern "C" fn sched() {
    let p = Process::current().unwrap();
    let cpu = Cpu::current();

    if cpu.interrupt_disable_layers != 1 {
        panic!("sched locks");
    } else if p.state == ProcessState::Running {
        panic!("sched running");
    } else if intr_get() > 0 {
        panic!("sched interruptible");
    }

    let previous_interrupts_enabled = cpu.previous_interrupts_enabled;
    swtch(addr_of_mut!(p.context), addr_of_mut!(cpu.context));
    cpu.previous_interrupts_enabled = previous_interrupts_enabled;
}

/// Sleep until `wakeup(chan)` is called somewhere else.
///
/// Caller must not be holding any lock besides `p->lock` itself.
pub unsafe fn sleep(chan: *mut c_void) {
    let p = Process::current().unwrap();
    let _guard = p.lock.lock();

    // Go to sleep.
    p.chan = chan;
    p.state = ProcessState::Sleeping;

    sched();

    // Tidy up.
    p.chan = null_mut();
}

/// Atomically release `lk` and sleep on `chan`, reacquiring `lk` before
/// returning. Mirrors the classic sleep(chan, lk) protocol: once `p->lock`
/// is held, a concurrent wakeup() cannot be missed, so it's safe to drop
/// `lk` (unless `lk` already *is* `p->lock`, in which case there's nothing
/// to hand off).
pub unsafe fn sleep_on(chan: *mut c_void, lk: &Spinlock) {
    let p = Process::current().unwrap();

    let same_lock = core::ptr::eq(lk, &p.lock);
    if !same_lock {
        p.lock.lock_unguarded();
        lk.unlock();
    }

    p.chan = chan;
    p.state = ProcessState::Sleeping;

    sched();

    p.chan = null_mut();

    if !same_lock {
        p.lock.unlock();
        lk.lock_unguarded();
    }
}

/// Like [`sleep_on`], but for callers holding a [`SpinMutex`] guard
/// instead of a [`Spinlock`] guard (the console and UART buffers).
pub unsafe fn sleep_on_mutex<T>(chan: *mut c_void, lk: &SpinMutex<T>) {
    let p = Process::current().unwrap();

    p.lock.lock_unguarded();
    lk.unlock();

    p.chan = chan;
    p.state = ProcessState::Sleeping;

    sched();

    p.chan = null_mut();

    p.lock.unlock();
    lk.lock_unguarded();
}
