//! `print!`/`println!` for kernel diagnostics, always routed to terminal 0
//! regardless of which group is currently scheduled.

use core::fmt::Write;

struct KernelSink;

impl Write for KernelSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        super::write(0, s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let _ = KernelSink.write_fmt(args);
    });
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::macros::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
