//! Process table, scheduler, and per-CPU state.

pub mod context;
pub mod cpu;
pub mod process;
pub mod scheduler;
pub mod trapframe;

pub use process::{
    procdump, proc_mapstacks, procinit, userinit, Process, ProcessError, ProcessState,
};
pub use scheduler::{r#yield, sleep, wakeup};

use core::ffi::c_void;

/// Return a pointer to the calling process's `Process`, or null if none.
///
/// Thin wrapper kept around for the syscall layer, which only ever
/// deals in raw pointers across the trampoline boundary.
#[no_mangle]
pub extern "C" fn myproc() -> *mut Process {
    match Process::current() {
        Some(p) => p as *mut Process,
        None => core::ptr::null_mut(),
    }
}

/// Create a new process, copying the parent. Returns the child's pid to the
/// parent and 0 to the child (via the child's trapframe).
pub unsafe fn fork() -> i32 {
    Process::fork().unwrap_or(-1)
}

/// Exit the current process. Does not return.
pub unsafe fn exit(status: i32) -> ! {
    Process::current().unwrap().exit(status)
}

/// Wait for a child to exit. Returns its pid, or -1 if the caller has no children.
pub unsafe fn wait(addr: u64) -> i32 {
    match Process::current().unwrap().wait_for_child(addr) {
        Ok(pid) => pid,
        Err(_) => -1,
    }
}

/// Grow or shrink the calling process's memory by `increment` bytes.
pub unsafe fn growproc(increment: i32) -> i32 {
    match Process::current().unwrap().grow_memory(increment) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Kill the process with the given pid. Returns 1 on success, 0 if not found.
pub unsafe fn kill(pid: i32) -> i32 {
    Process::kill(pid) as i32
}

/// Returns nonzero if `p` has been marked killed.
pub unsafe fn killed(p: *mut Process) -> i32 {
    (*p).is_killed() as i32
}

/// Sleep until `wakeup(chan)` is called elsewhere.
pub unsafe fn sleep_chan(chan: *mut c_void) {
    scheduler::sleep(chan)
}
