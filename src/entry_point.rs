//! Kernel bootstrap binary.
//!
//! Brings up paging, interrupts, the heap, and the three virtual terminals,
//! embeds a tiny flat filesystem image holding one program, and launches it
//! as the first process of each of the three process groups.

#![feature(custom_test_frameworks)]
#![test_runner(triterm_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use bootloader::{entry_point, BootInfo};
use triterm_os::memory::BootInfoFrameAllocator;
use triterm_os::{allocator, console, fs, memory, pit, process, rtc, scheduler, syscall};
use x86_64::VirtAddr;

entry_point!(main);

////////////////////////
//     Embedded shell //
////////////////////////

/// Minimal ring-3 payload embedded as the filesystem's one regular file.
///
/// Hand-assembled rather than produced by a toolchain invocation: four bytes
/// of magic header (skipped on load, never executed as code) followed by
/// `mov eax, SYS_WRITE`, `mov edi, STDOUT_FD`, `lea rsi, [rip + msg]`,
/// `mov edx, msg.len()`, `int 0x80`, a `halt(0)`, and a trailing `jmp $` as
/// a safety net in case control ever fell through past `halt`.
#[rustfmt::skip]
const SHELL_BINARY: [u8; 57] = [
    0x7f, b'E', b'L', b'F',                   // magic header (4 bytes, skipped)
    0xb8, 0x04, 0x00, 0x00, 0x00,             // mov eax, 4        (SYS_WRITE)
    0xbf, 0x01, 0x00, 0x00, 0x00,             // mov edi, 1        (STDOUT_FD)
    0x48, 0x8d, 0x35, 0x15, 0x00, 0x00, 0x00, // lea rsi, [rip+21] -> msg below
    0xba, 0x0e, 0x00, 0x00, 0x00,             // mov edx, 14       (msg.len(), excl. the trailing NUL)
    0xcd, 0x80,                               // int 0x80
    0xb8, 0x01, 0x00, 0x00, 0x00,             // mov eax, 1        (SYS_HALT)
    0xbf, 0x00, 0x00, 0x00, 0x00,             // mov edi, 0        (status 0)
    0xcd, 0x80,                               // int 0x80
    0xeb, 0xfe,                               // jmp $ (unreachable safety net)
    b'w', b'e', b'l', b'c', b'o', b'm', b'e', b' ', b't', b'o', b' ', b'o', b's', b'\n', 0,
];

/// Baked-in pids of the three boot shells: [`process::allocate_pid`] hands
/// out 0, 1, 2, 3 in order, and pid 0 is always claimed by
/// [`process::init_kernel_slot`] first, so the shells for groups 0, 1, 2
/// are deterministically pids 1, 2, 3.
extern "C" fn boot_shell_group0() -> ! {
    syscall::enter_initial_shell(1)
}
extern "C" fn boot_shell_group1() -> ! {
    syscall::enter_initial_shell(2)
}
extern "C" fn boot_shell_group2() -> ! {
    syscall::enter_initial_shell(3)
}

////////////////////////
//     Entry point    //
////////////////////////

#[expect(clippy::undocumented_unsafe_blocks)]
#[expect(clippy::expect_used)]
fn main(boot_info: &'static BootInfo) -> ! {
    triterm_os::init();

    let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
    let mut mapper = unsafe { memory::init(phys_mem_offset) };
    let mut frame_allocator = unsafe { BootInfoFrameAllocator::new(&boot_info.memory_map) };
    allocator::init_heap(&mut mapper, &mut frame_allocator).expect("heap initialization failed");
    memory::init_global(mapper, frame_allocator);

    pit::init();
    rtc::init();
    console::init();

    let image = fs::build_single_file_image("shell", &SHELL_BINARY);
    // SAFETY: `image` is leaked for the kernel's whole lifetime, matching
    // `FILESYSTEM_IMAGE`'s `'static` contract; there is no boot-time disk to
    // reread it from.
    let image: &'static [u8] = alloc::boxed::Box::leak(image.into_boxed_slice());
    triterm_os::FILESYSTEM_IMAGE.call_once(|| image);

    for group in 0..process::NUM_PROCESS_GROUPS {
        process::init_kernel_slot(group);
    }
    scheduler::init();

    let trampolines: [extern "C" fn() -> !; process::NUM_PROCESS_GROUPS] =
        [boot_shell_group0, boot_shell_group1, boot_shell_group2];

    for (group, trampoline) in trampolines.into_iter().enumerate() {
        process::set_current_group(group);
        let pid = process::allocate_pid().expect("boot: out of pids for static shells");
        process::setup(pid).expect("boot: pid out of range");
        process::prepare_initial_stack(pid, trampoline);
    }
    process::set_current_group(0);

    #[cfg(test)]
    test_main();

    triterm_os::hlt_loop();
}

////////////////////////
//    Panic handler   //
////////////////////////

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    triterm_os::serial_println!("kernel panic: {}", info);
    triterm_os::hlt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    triterm_os::test_panic_handler(info)
}
