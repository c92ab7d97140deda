//! Interrupt controller façade over the two cascaded 8259 PICs.
//!
//! [`pic8259::ChainedPics`] handles remapping and end-of-interrupt; the
//! per-line mask register it doesn't expose is maintained here directly,
//! following the original driver's own master/slave mask bytes.

use pic8259::ChainedPics;
use x86_64::instructions::port::Port;
use x86_64::instructions::interrupts;

/// Vector offset for the master PIC (IRQs 0-7).
pub const PIC_1_OFFSET: u8 = 32;
/// Vector offset for the slave PIC (IRQs 8-15).
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

const MASTER_DATA_PORT: u16 = 0x21;
const SLAVE_DATA_PORT: u16 = 0xA1;
/// The slave PIC is cascaded onto the master's IRQ 2 line.
const SLAVE_CASCADE_LINE: u8 = 2;

/// The chained PIC pair. Kept private; callers go through [`init`],
/// [`notify_end_of_interrupt`], [`enable_irq`], and [`disable_irq`].
static PICS: spin::Mutex<ChainedPics> =
    // SAFETY: offsets don't overlap CPU exception vectors (0-31).
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

static MASTER_MASK: spin::Mutex<u8> = spin::Mutex::new(0xFF);
static SLAVE_MASK: spin::Mutex<u8> = spin::Mutex::new(0xFF);

/// Remaps both PICs and masks every line until drivers opt in via
/// [`enable_irq`].
pub fn init() {
    interrupts::without_interrupts(|| {
        // SAFETY: called once at boot, before any IRQ is enabled.
        unsafe {
            PICS.lock().initialize();
        }
        *MASTER_MASK.lock() = 0xFF;
        *SLAVE_MASK.lock() = 0xFF;
        write_masks();
    });
}

/// Notifies the controller that vector `interrupt_id` has been serviced.
pub fn notify_end_of_interrupt(interrupt_id: u8) {
    // SAFETY: called from within an interrupt handler for a vector the
    // PICs actually raised.
    unsafe {
        PICS.lock().notify_end_of_interrupt(interrupt_id);
    }
}

/// Sends end-of-interrupt for hardware IRQ `irq` (0-15), translating to the
/// remapped vector the `pic8259` crate expects.
pub fn send_eoi(irq: u8) {
    notify_end_of_interrupt(PIC_1_OFFSET + irq);
}

/// Unmasks IRQ `irq` (0-15) so it is delivered to the CPU. Unmasking a
/// slave line (8-15) also unmasks the master's cascade line.
pub fn enable_irq(irq: u8) {
    interrupts::without_interrupts(|| {
        if irq >= 8 {
            let mut slave = SLAVE_MASK.lock();
            *slave &= !(1 << (irq - 8));
            let mut master = MASTER_MASK.lock();
            *master &= !(1 << SLAVE_CASCADE_LINE);
        } else {
            let mut master = MASTER_MASK.lock();
            *master &= !(1 << irq);
        }
        write_masks();
    });
}

/// Masks IRQ `irq` (0-15) so it is no longer delivered to the CPU.
pub fn disable_irq(irq: u8) {
    interrupts::without_interrupts(|| {
        if irq >= 8 {
            let mut slave = SLAVE_MASK.lock();
            *slave |= 1 << (irq - 8);
        } else {
            let mut master = MASTER_MASK.lock();
            *master |= 1 << irq;
        }
        write_masks();
    });
}

fn write_masks() {
    // SAFETY: the data ports' index has already been selected by the
    // controller's init command sequence; writing here only updates masks.
    unsafe {
        let mut master_port: Port<u8> = Port::new(MASTER_DATA_PORT);
        let mut slave_port: Port<u8> = Port::new(SLAVE_DATA_PORT);
        master_port.write(*MASTER_MASK.lock());
        slave_port.write(*SLAVE_MASK.lock());
    }
}
