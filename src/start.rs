use crate::{arch::riscv::*, main, NCPU};
use core::arch::asm;

// The original C has this aligned to 16 - hopefully that's not a problem.
#[no_mangle]
pub static mut stack0: [u8; 4096 * NCPU] = [0u8; 4096 * NCPU];

// entry.S jumps here in machine mode on stack0
#[no_mangle]
pub unsafe extern "C" fn start() {
    // Set M Previous Privilege mode to Supervisor, for mret.
    let mut x = r_mstatus();
    x &= !MSTATUS_MPP_MASK;
    x |= MSTATUS_MPP_S;
    w_mstatus(x);

    // Set M Exception Program Counter to main, for mret.
    w_mepc(main as usize as u64);

    // Disable paging for now.
    w_satp(0);

    // Delegate all interrupts and exceptions to supervisor mode.
    w_medeleg(0xffffu64);
    w_mideleg(0xffffu64);
    w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);

    // Configure Physical Memory Protection to give
    // supervisor mode access to all of physical memory.
    w_pmpaddr0(0x3fffffffffffffu64);
    w_pmpcfg0(0xf);

    // Ask for clock interrupts.
    crate::arch::riscv::clint::timerinit();

    // Keep each CPU's hartid in its tp register, for cpuid().
    w_tp(r_mhartid());

    // Switch to supervisor mode and jump to main().
    asm!("mret");
}
