use crate::sync::spinlock::Spinlock;
use core::ffi::{c_char, CStr};

pub static PRINT_LOCK: Spinlock = Spinlock::new();

/// Print out formatted text to the console.
/// Spins to acquire the lock.
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;

        let _guard = $crate::console::printf::PRINT_LOCK.lock();
        let mut cons = $crate::console::cons.lock();

        let _ = core::write!(cons.as_mut(), $($arg)*);
    }};
}
pub(crate) use print;

macro_rules! println {
    ($($arg:tt)*) => {{
        use $crate::console::printf::print;
        print!($($arg)*);
        print!("\n");
    }};
}
pub(crate) use println;

/// Print out formatted text straight to the UART, bypassing the
/// console lock and input buffer. Used by the panic handler, which
/// cannot assume any lock is safe to take.
macro_rules! uprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = core::write!($crate::console::uart::UartWriter, $($arg)*);
    }};
}
pub(crate) use uprint;

macro_rules! uprintln {
    ($($arg:tt)*) => {{
        use $crate::console::printf::uprint;
        uprint!($($arg)*);
        uprint!("\n");
    }};
}
pub(crate) use uprintln;

#[no_mangle]
pub extern "C" fn printint(n: i32) {
    print!("{}", n);
}

#[no_mangle]
pub unsafe extern "C" fn printstr(s: *const c_char) {
    let s = CStr::from_ptr(s).to_str().unwrap_or_default();
    print!("{}", s);
}
