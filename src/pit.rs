//! Programmable interval timer driver.
//!
//! Drives the preemptive scheduler's tick on IRQ 0. Programmed for square
//! wave mode with a 16-bit lobyte/hibyte reload so the tick period is exact,
//! rather than the original driver's 8-bit-only reload (which left the
//! period a few times faster than its own comment claimed).

use x86_64::instructions::port::Port;

use crate::pic;

const CHANNEL_0_DATA_PORT: u16 = 0x40;
const MODE_COMMAND_PORT: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 3 (square wave), binary mode.
const MODE_COMMAND: u8 = 0b0011_0110;

/// The PIT's fixed input clock frequency.
const BASE_FREQUENCY_HZ: u32 = 1_193_182;

/// Scheduler tick rate: a ~20 ms quantum, close to the original's comment
/// but computed against the full 16-bit reload.
pub const TICK_HZ: u32 = 50;

/// Programs channel 0 for a periodic interrupt at [`TICK_HZ`] and unmasks
/// IRQ 0.
pub fn init() {
    let reload = (BASE_FREQUENCY_HZ / TICK_HZ) as u16;

    // SAFETY: PIT ports are fixed and exclusively owned by us.
    unsafe {
        let mut command: Port<u8> = Port::new(MODE_COMMAND_PORT);
        let mut data: Port<u8> = Port::new(CHANNEL_0_DATA_PORT);

        command.write(MODE_COMMAND);
        data.write((reload & 0xFF) as u8);
        data.write((reload >> 8) as u8);
    }

    pic::enable_irq(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_reload_value_matches_tick_rate() {
        let reload = BASE_FREQUENCY_HZ / TICK_HZ;
        assert!(reload > 0 && reload <= u32::from(u16::MAX), "reload must fit in 16 bits");
    }
}
