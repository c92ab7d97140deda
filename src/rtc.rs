//! Virtualized real-time clock.
//!
//! The physical RTC always ticks at a fixed 1024 Hz once opened; every
//! process group gets its own virtual rate on top of that by counting how
//! many physical interrupts have to elapse before `read` unblocks. This is
//! the same scheme as a PIT-driven software divider, just fed by the RTC's
//! periodic interrupt instead of a programmable counter.

use x86_64::instructions::port::Port;

use crate::pic;
use crate::process::NUM_PROCESS_GROUPS;

const CMOS_ADDRESS: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;
const REG_A: u8 = 0x0A;
const REG_B: u8 = 0x0B;
const REG_C: u8 = 0x0C;
const NMI_DISABLE: u8 = 0x80;

/// The RTC always physically ticks at this rate once periodic interrupts
/// are enabled; virtual rates are realized by dividing it down in software.
const PHYSICAL_RATE_HZ: u32 = 1024;

/// Lowest virtual rate a process may request.
pub const MIN_RATE_HZ: u32 = 2;
/// Highest virtual rate a process may request (the hardware ceiling).
pub const MAX_RATE_HZ: u32 = 1024;

/// Per-group divider state. `waiting` is set by `read` and cleared by the
/// interrupt handler once enough physical ticks have elapsed.
struct GroupState {
    divider: u32,
    ticks_seen: u32,
    waiting: bool,
}

impl GroupState {
    const fn new() -> Self {
        Self {
            divider: PHYSICAL_RATE_HZ / MIN_RATE_HZ,
            ticks_seen: 0,
            waiting: false,
        }
    }
}

static STATE: spin::Mutex<[GroupState; NUM_PROCESS_GROUPS]> =
    spin::Mutex::new([GroupState::new(), GroupState::new(), GroupState::new()]);

/// Enables the physical RTC's periodic interrupt and registers it with the
/// PIC (IRQ 8, the secondary controller's first line).
pub fn init() {
    // SAFETY: CMOS index/data ports are fixed and exclusively owned by us.
    unsafe {
        let mut index: Port<u8> = Port::new(CMOS_ADDRESS);
        let mut data: Port<u8> = Port::new(CMOS_DATA);

        index.write(REG_B | NMI_DISABLE);
        let prev_b: u8 = data.read();
        index.write(REG_B | NMI_DISABLE);
        data.write(prev_b | 0x40); // Periodic Interrupt Enable
    }

    pic::enable_irq(8);
}

/// Reprograms the physical rate register to its fastest setting, then
/// resets the calling process group to the default 2 Hz virtual rate.
///
/// Grounded on `rtc_open`: opening `rtc` always resets the virtual rate,
/// regardless of whatever a previous occupant of the group had configured.
pub fn open(group: usize) {
    // SAFETY: CMOS index/data ports are fixed and exclusively owned by us.
    unsafe {
        let mut index: Port<u8> = Port::new(CMOS_ADDRESS);
        let mut data: Port<u8> = Port::new(CMOS_DATA);

        index.write(REG_A | NMI_DISABLE);
        let prev_a: u8 = data.read();
        index.write(REG_A | NMI_DISABLE);
        data.write((prev_a & 0xF0) | 0x06);
    }

    let mut state = STATE.lock();
    state[group] = GroupState::new();
}

/// Blocks (busy-waits) until the next virtual tick for `group` occurs.
pub fn read(group: usize) {
    {
        let mut state = STATE.lock();
        state[group].waiting = true;
        state[group].ticks_seen = 0;
    }

    loop {
        if !STATE.lock()[group].waiting {
            break;
        }
        x86_64::instructions::hlt();
    }
}

/// Sets the virtual interrupt rate for `group`.
///
/// # Errors
///
/// Returns an error if `rate_hz` is not a power of two within
/// `[MIN_RATE_HZ, MAX_RATE_HZ]`.
pub fn write(group: usize, rate_hz: u32) -> Result<(), &'static str> {
    let is_power_of_two = rate_hz != 0 && (rate_hz & (rate_hz - 1)) == 0;
    if !is_power_of_two || !(MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate_hz) {
        return Err("rtc: rate must be a power of two between 2 and 1024 Hz");
    }

    let mut state = STATE.lock();
    state[group].divider = PHYSICAL_RATE_HZ / rate_hz;
    Ok(())
}

/// Interrupt handler for IRQ 8. Advances every waiting group's tick count
/// and clears `waiting` for any group whose virtual period has elapsed.
pub fn handle_interrupt() {
    pic::disable_irq(8);
    pic::send_eoi(8);

    {
        let mut state = STATE.lock();
        for group_state in state.iter_mut() {
            if group_state.waiting {
                group_state.ticks_seen += 1;
                if group_state.ticks_seen >= group_state.divider {
                    group_state.waiting = false;
                }
            }
        }
    }

    // Reading register C is required by the hardware to arm the next
    // interrupt; the value itself is unused.
    // SAFETY: CMOS index/data ports are fixed and exclusively owned by us.
    unsafe {
        let mut index: Port<u8> = Port::new(CMOS_ADDRESS);
        let mut data: Port<u8> = Port::new(CMOS_DATA);
        index.write(REG_C);
        let _: u8 = data.read();
    }

    pic::enable_irq(8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_write_rejects_non_power_of_two() {
        assert!(write(0, 3).is_err());
    }

    #[test_case]
    fn test_write_rejects_out_of_range() {
        assert!(write(0, 1).is_err(), "below MIN_RATE_HZ");
        assert!(write(0, 2048).is_err(), "above MAX_RATE_HZ");
    }

    #[test_case]
    fn test_write_accepts_valid_rate() {
        assert!(write(0, 8).is_ok());
        assert_eq!(STATE.lock()[0].divider, PHYSICAL_RATE_HZ / 8);
    }
}
