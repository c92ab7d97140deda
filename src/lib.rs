//! A small teaching operating system for 32-bit-style protected mode,
//! targeting x86_64 long mode as its concrete hardware model.
//!
//! Three virtual terminals each run their own round-robin-scheduled chain
//! of programs, loaded from a flat read-only filesystem image and talking
//! to the kernel through a single `int 0x80` syscall gate. Refer to
//! `DESIGN.md` for how each module maps onto that picture.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use spin::Once;

pub mod allocator;
pub mod console;
pub mod drivers;
pub mod fs;
pub mod gdt;
pub mod interrupts;
pub mod memory;
pub mod pic;
pub mod pit;
pub mod process;
pub mod rtc;
pub mod scheduler;
pub mod serial;
pub mod syscall;

const QEMU_EXIT_PORT: u16 = 0xf4;

/// The flat filesystem image this kernel was booted with, embedded
/// alongside the kernel binary by the bootstrap linker script.
pub static FILESYSTEM_IMAGE: Once<&'static [u8]> = Once::new();

/// Runs the one-time kernel bring-up sequence shared by the real bootstrap
/// and the integration test harness: GDT/TSS, IDT, PIC, and the syscall
/// gate. Paging, the heap, the filesystem, and process/console state are
/// each initialized separately since integration tests only need a subset.
pub fn init() {
    gdt::init();
    interrupts::init_idt();
    pic::init();
    x86_64::instructions::interrupts::enable();
}

/// Halts the CPU until the next interrupt, in a loop. Used as the kernel's
/// idle loop and as a fallback when there is truly nothing left to resume.
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Test entry point for cargo test.
#[cfg(test)]
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// Define possible exit code for qemu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Define a successfull exit status
    Success = 0x10,
    /// Define a failure exit status
    Failure = 0x11,
}

/// Exit qemu with a specific exit code.
/// Connect to an IO Port to exit qemu.
/// Configuration for the exit port is in the config.toml file.
pub fn exit_qemu(exit_code: QemuExitCode) {
    use x86_64::instructions::port::Port;

    // SAFETY:
    // Create a `Port` to write exit_code for qemu.
    unsafe {
        let mut port = Port::new(QEMU_EXIT_PORT);
        port.write(exit_code as u32);
    }
}

/// Panic handler for external (functional) tests.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop if a test panics. It should not be possible as we exit_qemu before."
    )]
    loop {}
}

/// Custom test runner for `no_std` testing.
pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for unit tests.
#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);
    loop {}
}

/// Trait to generalize tests cases.
/// Encapsulate the prints
pub trait Testable {
    /// Function that encapsulate the test run function.
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        use core::any::type_name;

        serial_print!("{}...\t", type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}
