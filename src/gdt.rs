//! GDT and TSS initialization.
//!
//! Unlike a single-process kernel, `esp0` (the stack the CPU loads on a
//! ring-3 -> ring-0 transition) has to change every time the scheduler
//! rotates to a different process's kernel stack. The TSS the hardware
//! reads from is therefore kept as a plain mutable static rather than a
//! `lazy_static!` constant, and [`set_kernel_stack`] pokes its
//! `privilege_stack_table[0]` field directly; the CPU rereads the TSS from
//! memory on every transition, so no `ltr` reload is needed after boot.

use lazy_static::lazy_static;
use x86_64::{
    instructions::tables::load_tss,
    registers::segmentation::{Segment, CS},
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

/// The index of the IST entry for the double fault handler.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

/// Size of the kernel stack used when transitioning from Ring 3 to Ring 0
/// before any process has been scheduled yet.
const KERNEL_STACK_SIZE: usize = 4096 * 5;

/// Size of the double fault handler stack.
const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// Initialize the Global Descriptor Table (GDT) and Task State Segment.
pub fn init() {
    static mut DOUBLE_FAULT_STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];
    static mut BOOT_KERNEL_STACK: [u8; KERNEL_STACK_SIZE] = [0; KERNEL_STACK_SIZE];

    // SAFETY: runs once, before interrupts are enabled, so nothing else can
    // be reading `TSS` concurrently.
    unsafe {
        let df_stack_start = VirtAddr::from_ptr(&raw const DOUBLE_FAULT_STACK);
        TSS.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            df_stack_start + DOUBLE_FAULT_STACK_SIZE as u64;

        let boot_stack_start = VirtAddr::from_ptr(&raw const BOOT_KERNEL_STACK);
        TSS.privilege_stack_table[0] = boot_stack_start + KERNEL_STACK_SIZE as u64;
    }

    GDT.0.load();

    // SAFETY:
    // The GDT is loaded and the CS register is set to the code selector.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        load_tss(GDT.1.tss_selector);
    }
}

/// Points `esp0` at `stack_top`, the kernel stack the CPU should switch to
/// the next time a ring-3 -> ring-0 transition occurs.
///
/// Called by the scheduler on every context switch and by `execute` before
/// a freshly loaded program's first `iretq`.
pub fn set_kernel_stack(stack_top: u64) {
    // SAFETY: the TSS is only ever written here, with interrupts disabled
    // for the duration of the scheduler/syscall path that calls this.
    unsafe {
        TSS.privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

/// Returns the user code segment selector with Ring 3 privilege level.
#[must_use]
pub fn user_code_selector() -> SegmentSelector {
    GDT.1.user_code_selector
}

/// Returns the user data segment selector with Ring 3 privilege level.
#[must_use]
pub fn user_data_selector() -> SegmentSelector {
    GDT.1.user_data_selector
}

/// Holds the GDT segment selectors used during initialization and user mode transitions.
struct Selectors {
    code_selector: SegmentSelector,
    tss_selector: SegmentSelector,
    user_code_selector: SegmentSelector,
    user_data_selector: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.add_entry(Descriptor::kernel_code_segment());
        // SAFETY: taking a shared reference for the descriptor only; all
        // mutation goes through `set_kernel_stack`, which the GDT doesn't
        // need to know about since the CPU rereads the TSS from memory.
        let tss_selector = gdt.add_entry(Descriptor::tss_segment(unsafe { &*(&raw const TSS) }));

        // Add user mode segments. The selectors returned by `add_entry` have RPL=0,
        // so we create new selectors with RPL=3 for Ring 3 execution.
        let user_data_entry = gdt.add_entry(Descriptor::user_data_segment());
        let user_code_entry = gdt.add_entry(Descriptor::user_code_segment());

        let user_data_selector = SegmentSelector(user_data_entry.0 | 3);
        let user_code_selector = SegmentSelector(user_code_entry.0 | 3);

        (
            gdt,
            Selectors {
                code_selector,
                tss_selector,
                user_code_selector,
                user_data_selector,
            },
        )
    };
}
