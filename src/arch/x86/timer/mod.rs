//! PIT-driven periodic tick feeding the scheduler's quantum accounting.
//!
//! `trap::irq`'s dispatcher special-cases the timer vector directly
//! (`task::scheduler::on_tick`), so this module's only job is programming
//! the PIT to fire at `config::TIMER_FREQ` and unmasking its IRQ line.

use x86_64::instructions::port::Port;

use crate::config::TIMER_FREQ;

/// The PIT's own oscillator frequency (Hz).
const PIT_BASE_FREQ: u64 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator), binary.
const PIT_CMD_CHANNEL0_MODE2: u8 = 0b0011_0100;

/// Programs the PIT for a `TIMER_FREQ` Hz periodic tick on IRQ0 and
/// unmasks the line. Must run after `kernel::pic::init`.
pub(crate) fn init() {
    let divisor = (PIT_BASE_FREQ / TIMER_FREQ).clamp(1, u16::MAX as u64) as u16;
    unsafe {
        Port::<u8>::new(PIT_COMMAND).write(PIT_CMD_CHANNEL0_MODE2);
        Port::<u8>::new(PIT_CHANNEL0_DATA).write((divisor & 0xFF) as u8);
        Port::<u8>::new(PIT_CHANNEL0_DATA).write((divisor >> 8) as u8);
    }
    super::kernel::pic::unmask(0);
}
