//! Interrupt descriptor table and the hardware interrupt handlers that feed
//! the scheduler, console, and virtualized RTC.

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyEvent, KeyState, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::{
    instructions::port::Port,
    structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode},
};

use crate::{console, gdt, pic, println, process, rtc, scheduler, syscall};

/// Vector offset for hardware IRQs, chosen to land right after the CPU's
/// own 32 exception vectors.
pub const PIC_1_OFFSET: u8 = pic::PIC_1_OFFSET;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    Rtc = PIC_1_OFFSET + 8,
}

impl InterruptIndex {
    const fn as_usize(self) -> usize {
        self as u8 as usize
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);

        // SAFETY: index is valid and the stack it names is reserved.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }

        idt[InterruptIndex::Timer.as_usize()].set_handler_fn(scheduler::timer_interrupt_handler);
        idt[InterruptIndex::Keyboard.as_usize()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Rtc.as_usize()].set_handler_fn(rtc_interrupt_handler);

        syscall::register(&mut idt);

        idt
    };
}

/// Loads the interrupt descriptor table.
pub fn init_idt() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

/// Every process-terminating CPU exception halts the offending process with
/// exit status 256, the same convention the original exception dispatcher
/// used to distinguish a fault-induced exit from a normal `halt` (whose
/// status is a single byte and can never reach 256).
const EXCEPTION_EXIT_STATUS: u64 = 256;

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    println!("EXCEPTION: PAGE FAULT ({:?})\n{:#?}", error_code, stack_frame);
    terminate_current_process();
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    println!("EXCEPTION: GENERAL PROTECTION FAULT ({})\n{:#?}", error_code, stack_frame);
    terminate_current_process();
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: DIVIDE ERROR\n{:#?}", stack_frame);
    terminate_current_process();
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
    terminate_current_process();
}

/// Tears down whatever process is running in the currently scheduled group
/// and resumes its parent with exit status 256, the way the original
/// exception dispatcher forced a `halt(256)` on a program that faulted. Any
/// group with no process yet (a CPU exception during boot) simply halts the
/// kernel instead, since there is nothing to resume.
fn terminate_current_process() -> ! {
    syscall::force_halt(EXCEPTION_EXIT_STATUS)
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    lazy_static! {
        static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
            Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::MapLettersToUnicode)
        );
    }

    let mut port: Port<u8> = Port::new(0x60);
    // SAFETY: reading the keyboard controller's fixed data port.
    let scancode: u8 = unsafe { port.read() };

    let mut keyboard = KEYBOARD.lock();
    if let Ok(Some(key_event)) = keyboard.add_byte(scancode) {
        handle_key_event(&mut keyboard, key_event);
    }

    pic::send_eoi(1);
}

fn handle_key_event(keyboard: &mut Keyboard<layouts::Us104Key, ScancodeSet1>, event: KeyEvent) {
    if event.state == KeyState::Down {
        let (alt_held, ctrl_held) = {
            let modifiers = keyboard.get_modifiers();
            (modifiers.lalt || modifiers.ralt, modifiers.lctrl || modifiers.rctrl)
        };

        if alt_held {
            if let KeyCode::F1 | KeyCode::F2 | KeyCode::F3 = event.code {
                // Alt+F1..F3 switches the visible terminal; consumed here
                // rather than echoed to any terminal's line buffer. A bare
                // F-key with no Alt held falls through to normal handling.
                let target = match event.code {
                    KeyCode::F1 => 0,
                    KeyCode::F2 => 1,
                    _ => 2,
                };
                let _ = console::switch_to(target);
                return;
            }
        }

        if ctrl_held && event.code == KeyCode::L {
            // Ctrl+L clears the screen but leaves the line buffer alone.
            console::clear_screen(process::current_group());
            return;
        }
    }

    if let Some(DecodedKey::Unicode(c)) = keyboard.process_keyevent(event) {
        let group = process::current_group();
        let mut buf = [0u8; 4];
        for byte in c.encode_utf8(&mut buf).as_bytes() {
            console::key_input(group, *byte);
        }
    }
}

extern "x86-interrupt" fn rtc_interrupt_handler(_stack_frame: InterruptStackFrame) {
    rtc::handle_interrupt();
}

#[cfg(test)]
mod tests {
    use x86_64::instructions::interrupts;

    #[test_case]
    fn test_breakpoint_exception() {
        interrupts::int3();
    }
}
