//! The legacy 8259 programmable interrupt controller.
//!
//! Remapped so the 16 IRQ lines land on vectors `IRQ_BASE..IRQ_BASE+16`
//! (32-47), clear of the CPU's reserved 0-31 exception vectors.

use x86_64::instructions::port::Port;

use crate::trap::IRQ_BASE;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;

/// Remaps both PICs and masks every line except IRQ0 (timer) and IRQ4
/// (COM1), which `timer`/`device::serial` unmask themselves once ready.
pub(crate) fn init() {
    unsafe {
        let mut pic1_cmd = Port::<u8>::new(PIC1_CMD);
        let mut pic1_data = Port::<u8>::new(PIC1_DATA);
        let mut pic2_cmd = Port::<u8>::new(PIC2_CMD);
        let mut pic2_data = Port::<u8>::new(PIC2_DATA);

        let saved_mask1 = pic1_data.read();
        let saved_mask2 = pic2_data.read();

        pic1_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();
        pic2_cmd.write(ICW1_INIT | ICW1_ICW4);
        io_wait();

        pic1_data.write(IRQ_BASE); // ICW2: master offset
        io_wait();
        pic2_data.write(IRQ_BASE + 8); // ICW2: slave offset
        io_wait();

        pic1_data.write(1 << 2); // ICW3: slave attached to master's IRQ2
        io_wait();
        pic2_data.write(2); // ICW3: slave's cascade identity
        io_wait();

        pic1_data.write(ICW4_8086);
        io_wait();
        pic2_data.write(ICW4_8086);
        io_wait();

        // Start fully masked except the cascade line; individual drivers
        // unmask the lines they handle.
        let _ = (saved_mask1, saved_mask2);
        pic1_data.write(0xFF & !(1 << 2));
        pic2_data.write(0xFF);
    }
}

fn io_wait() {
    unsafe { Port::<u8>::new(0x80).write(0) };
}

fn mask_register(irq: u8) -> u16 {
    if irq < 8 {
        PIC1_DATA
    } else {
        PIC2_DATA
    }
}

/// Unmasks IRQ line `irq` (0-15) so the PIC forwards it to the CPU.
pub(crate) fn unmask(irq: u8) {
    unsafe {
        let mut port = Port::<u8>::new(mask_register(irq));
        let bit = irq % 8;
        let mask = port.read();
        port.write(mask & !(1 << bit));
    }
}

/// Masks IRQ line `irq` (0-15).
pub(crate) fn mask(irq: u8) {
    unsafe {
        let mut port = Port::<u8>::new(mask_register(irq));
        let bit = irq % 8;
        let mask = port.read();
        port.write(mask | (1 << bit));
    }
}

/// Masks every line on both PICs (C10 shutdown orchestrator).
pub(crate) fn mask_all() {
    unsafe {
        Port::<u8>::new(PIC1_DATA).write(0xFF);
        Port::<u8>::new(PIC2_DATA).write(0xFF);
    }
}

/// Sends end-of-interrupt for `irq` (0-15), including the cascade EOI to
/// the master when the line is on the slave PIC.
pub(crate) fn eoi(irq: u8) {
    unsafe {
        if irq >= 8 {
            Port::<u8>::new(PIC2_CMD).write(0x20);
        }
        Port::<u8>::new(PIC1_CMD).write(0x20);
    }
}

/// Sends EOI to both PICs unconditionally. `trap::irq`'s dispatcher doesn't
/// thread the firing line through to `interrupts_ack`, and an EOI write to
/// a PIC with nothing pending is harmless, so this is the simple correct
/// choice given that contract.
pub(crate) fn eoi_any() {
    unsafe {
        Port::<u8>::new(PIC2_CMD).write(0x20);
        Port::<u8>::new(PIC1_CMD).write(0x20);
    }
}
