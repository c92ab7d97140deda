//! Round-robin preemptive scheduler.
//!
//! One process group runs at a time; the PIT's timer interrupt rotates to
//! the next group, swapping kernel stacks the same way a cooperative
//! context switch would. Because every handler here runs through the
//! `x86-interrupt` calling convention, the hardware-generated interrupt
//! frame already accounts for the ring-3 -> ring-0 stack switch; unlike the
//! original driver this scheduler never needs to patch a CPL-dependent word
//! offset into `tss.esp0` by hand; it only ever points `esp0` at the fixed
//! top of the incoming process's kernel stack slab.

use x86_64::structures::idt::InterruptStackFrame;

use crate::{gdt, memory, pic, process};

/// Initializes the scheduler to start from group 0.
pub fn init() {
    process::set_current_group(0);
}

/// PIT timer interrupt handler: rotates to the next process group.
pub extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    pic::send_eoi(0);
    rotate();
}

fn rotate() {
    let old_group = process::current_group();
    let new_group = (old_group + 1) % process::NUM_PROCESS_GROUPS;

    let (old_pid, new_pid) = match (process::active_pid(old_group), process::active_pid(new_group)) {
        (Some(old_pid), Some(new_pid)) if old_pid != new_pid => (old_pid, new_pid),
        _ => {
            // A group without a running process yet (still booting), or the
            // same process occupying both slots: nothing to switch.
            process::set_current_group(new_group);
            return;
        }
    };

    process::set_current_group(new_group);

    memory::switch_user_address_space(new_pid);
    memory::sync_vidmap_mapping(new_pid, new_group);

    gdt::set_kernel_stack(process::kernel_stack_top(new_pid));

    let old_esp_slot = process::context_esp_slot(old_pid);
    let new_esp = process::context_esp(new_pid);

    // SAFETY: both pids name live, initialized PCB kernel stacks; the old
    // slot is written with the suspended rsp before control transfers to
    // the new stack, and is read back the next time this pid is resumed.
    unsafe {
        switch_context(old_esp_slot, new_esp);
    }
}

/// Swaps the live stack pointer from the currently running context to
/// `new_rsp`, saving the outgoing rsp into `*old_rsp_slot`.
///
/// # Safety
///
/// `old_rsp_slot` must point at a valid, exclusively-owned `u64`, and
/// `new_rsp` must be a stack pointer previously produced either by this
/// function's own save path or by [`process::prepare_initial_stack`].
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old_rsp_slot: *mut u64, _new_rsp: u64) {
    // SAFETY: System V AMD64 ABI: rdi = old_rsp_slot, rsi = new_rsp.
    core::arch::naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}
