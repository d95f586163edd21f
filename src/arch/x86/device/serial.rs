//! A port-mapped UART. Copied from uart_16550.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;

use crate::arch::x86::device::io_port::{IoPort, ReadWriteAccess, WriteOnlyAccess};
use crate::sync::SpinLock;
use crate::trap::{TrapFrame, IRQ_BASE};

bitflags::bitflags! {
  struct LineSts: u8 {
    const INPUT_FULL = 1;
    const OUTPUT_EMPTY = 1 << 5;
  }
}

const SERIAL_DATA_PORT: u16 = 0x3F8;
/// IRQ4 is the legacy COM1 line, remapped behind `IRQ_BASE` by `kernel::pic`.
const SERIAL_IRQ_VECTOR: u8 = IRQ_BASE + 4;

static SERIAL_DATA: IoPort<u8, ReadWriteAccess> = unsafe { IoPort::new(SERIAL_DATA_PORT) };
static SERIAL_INT_EN: IoPort<u8, WriteOnlyAccess> = unsafe { IoPort::new(SERIAL_DATA_PORT + 1) };
static SERIAL_FIFO_CTRL: IoPort<u8, WriteOnlyAccess> = unsafe { IoPort::new(SERIAL_DATA_PORT + 2) };
static SERIAL_LINE_CTRL: IoPort<u8, WriteOnlyAccess> = unsafe { IoPort::new(SERIAL_DATA_PORT + 3) };
static SERIAL_MODEM_CTRL: IoPort<u8, WriteOnlyAccess> =
    unsafe { IoPort::new(SERIAL_DATA_PORT + 4) };
static SERIAL_LINE_STS: IoPort<u8, ReadWriteAccess> = unsafe { IoPort::new(SERIAL_DATA_PORT + 5) };

static SERIAL_INPUT_CALLBACKS: SpinLock<Vec<Arc<dyn Fn(u8) + Send + Sync + 'static>>> =
    SpinLock::new(Vec::new());

/// Initializes the serial port.
pub(crate) fn init() {
    // Disable interrupts
    SERIAL_INT_EN.write(0x00);
    // Enable DLAB
    SERIAL_LINE_CTRL.write(0x80);
    // Set maximum speed to 38400 bps by configuring DLL and DLM
    SERIAL_DATA.write(0x03);
    SERIAL_INT_EN.write(0x00);
    // Disable DLAB and set data word length to 8 bits
    SERIAL_LINE_CTRL.write(0x03);
    // Enable FIFO, clear TX/RX queues and
    // set interrupt watermark at 14 bytes
    SERIAL_FIFO_CTRL.write(0xC7);
    // Mark data terminal ready, signal request to send
    // and enable auxilliary output #2 (used as interrupt line for CPU)
    SERIAL_MODEM_CTRL.write(0x0B);
    // Enable interrupts
    SERIAL_INT_EN.write(0x01);
}

/// Hooks up the COM1 IRQ line so bytes typed into the serial console wake
/// registered callbacks. Must run after `trap::init` and `kernel::pic::init`.
pub(crate) fn callback_init() {
    crate::trap::register_irq_handler(SERIAL_IRQ_VECTOR, handle_serial_input);
}

pub fn register_serial_input_callback(f: impl Fn(u8) + Send + Sync + 'static) {
    SERIAL_INPUT_CALLBACKS.lock().push(Arc::new(f));
}

fn handle_serial_input(_trap_frame: &TrapFrame) {
    let Some(lock) = SERIAL_INPUT_CALLBACKS.try_lock() else {
        return;
    };
    let Some(received_char) = receive_char() else {
        return;
    };
    debug!("serial: received char = {:?}", received_char);
    for callback in lock.iter() {
        callback(received_char);
    }
}

fn line_sts() -> LineSts {
    LineSts::from_bits_truncate(SERIAL_LINE_STS.read())
}

/// Sends a byte on the serial port.
pub fn send(data: u8) {
    match data {
        8 | 0x7F => {
            while !line_sts().contains(LineSts::OUTPUT_EMPTY) {}
            SERIAL_DATA.write(8);
            while !line_sts().contains(LineSts::OUTPUT_EMPTY) {}
            SERIAL_DATA.write(b' ');
            while !line_sts().contains(LineSts::OUTPUT_EMPTY) {}
            SERIAL_DATA.write(8);
        }
        _ => {
            while !line_sts().contains(LineSts::OUTPUT_EMPTY) {}
            SERIAL_DATA.write(data);
        }
    }
}

/// Receives a byte on the serial port. Non-blocking.
pub fn receive_char() -> Option<u8> {
    if line_sts().contains(LineSts::INPUT_FULL) {
        Some(SERIAL_DATA.read())
    } else {
        None
    }
}
