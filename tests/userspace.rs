//! Integration test for the syscall gate and Ring 3 program loading.
//!
//! Boots the kernel, embeds a one-program filesystem image, and runs that
//! program through [`syscall::execute_sync`], the same loader/Ring-3-entry
//! path `execute` uses from behind `int 0x80`, verifying it returns to the
//! kernel instead of faulting.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(triterm_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]

extern crate alloc;

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use triterm_os::{
    allocator, console, fs, memory,
    memory::BootInfoFrameAllocator,
    process, scheduler, serial_println, syscall,
};
use x86_64::VirtAddr;

entry_point!(test_kernel_main);

/// A minimal embedded program: writes nothing, just halts with status 42.
#[rustfmt::skip]
const TEST_PROGRAM: [u8; 18] = [
    0x7f, b'E', b'L', b'F',       // magic header, skipped
    0xb8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1  (SYS_HALT)
    0xbf, 0x2a, 0x00, 0x00, 0x00, // mov edi, 42 (status)
    0xcd, 0x80,                   // int 0x80
    0xeb, 0xfe,                   // jmp $
];

fn test_kernel_main(boot_info: &'static BootInfo) -> ! {
    triterm_os::init();

    let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
    // SAFETY: physical memory offset is valid as guaranteed by the bootloader.
    let mut mapper = unsafe { memory::init(phys_mem_offset) };
    // SAFETY: the memory map is valid as guaranteed by the bootloader.
    let mut frame_allocator = unsafe { BootInfoFrameAllocator::new(&boot_info.memory_map) };
    allocator::init_heap(&mut mapper, &mut frame_allocator).expect("heap initialization failed");
    memory::init_global(mapper, frame_allocator);

    console::init();
    process::init_kernel_slot(0);
    scheduler::init();

    let image = fs::build_single_file_image("prog", &TEST_PROGRAM);
    let image: &'static [u8] = alloc::boxed::Box::leak(image.into_boxed_slice());
    triterm_os::FILESYSTEM_IMAGE.call_once(|| image);

    test_main();

    triterm_os::hlt_loop();
}

/// The fixed program window must sit below the `vidmap` window, and both
/// must be page-aligned: programs and the scheduler rely on whole-page
/// mappings, not byte ranges.
#[test_case]
fn test_program_window_is_page_aligned_and_below_vidmap() {
    assert_eq!(memory::USER_CODE_VIRT_BASE % 4096, 0);
    assert_eq!(memory::USER_VIDMAP_VIRT % 4096, 0);
    assert!(memory::USER_CODE_VIRT_BASE + memory::PROGRAM_WINDOW_PAGES * 4096 <= memory::USER_VIDMAP_VIRT);
}

/// The syscall interrupt vector must be `0x80`, matching the convention
/// every embedded program is hand-assembled against.
#[test_case]
fn test_syscall_interrupt_index_is_0x80() {
    assert_eq!(syscall::SYSCALL_INTERRUPT_INDEX, 0x80);
}

/// Loading and entering a program that immediately halts must return control
/// to the kernel rather than faulting, proving the GDT user segments, the
/// mapped program window, and the `int 0x80` gate all agree with each other.
#[test_case]
fn test_execute_and_halt_round_trip() {
    process::set_current_group(0);
    syscall::execute_sync("prog").expect("the embedded test program must load and run");
    serial_println!("[ok] execute/halt round trip");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    triterm_os::test_panic_handler(info)
}
