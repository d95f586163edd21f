//! IRQ dispatch and the local-interrupt-disable guard.
//!
//! Vectors 32-47 share the dispatcher's stub machinery (`trap::idt`) but are
//! routed here instead of through the exception precedence rules: the timer
//! tick feeds the scheduler's quantum accounting directly, and every other
//! line runs whatever callbacks a driver registered, then the PIC gets its
//! EOI.

use alloc::boxed::Box;
use alloc::vec::Vec;
use x86_64::structures::idt::InterruptStackFrame;

use crate::arch::x86::irq as raw;
use crate::sync::SpinLock;

use super::exception::IRQ_BASE;
use super::frame::TrapFrame;

const NUM_IRQ_LINES: usize = 16;

/// The PIT-driven timer tick's vector, after the legacy 8259 remap to
/// `IRQ_BASE` (vector 32 = IRQ0).
pub const TIMER_IRQ_VECTOR: u8 = IRQ_BASE;

type IrqCallback = Box<dyn Fn(&TrapFrame) + Send + Sync + 'static>;

static CALLBACKS: [SpinLock<Vec<IrqCallback>>; NUM_IRQ_LINES] = [
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
    SpinLock::new(Vec::new()),
];

/// Registers a callback invoked whenever `vector` (32-47) fires. Multiple
/// callbacks may share a line; all of them run, in registration order.
pub fn register_irq_handler<F>(vector: u8, callback: F)
where
    F: Fn(&TrapFrame) + Send + Sync + 'static,
{
    let line = (vector - IRQ_BASE) as usize;
    CALLBACKS[line].lock_irq_disabled().push(Box::new(callback));
}

/// Entry point every IRQ stub in `trap::idt` forwards into.
pub(super) fn dispatch(vector: u8, stack_frame: &InterruptStackFrame) {
    let frame = TrapFrame::new(vector as u64, 0, stack_frame);
    if vector == TIMER_IRQ_VECTOR {
        crate::task::scheduler::on_tick();
    }
    let line = (vector - IRQ_BASE) as usize;
    if line < NUM_IRQ_LINES {
        for callback in CALLBACKS[line].lock().iter() {
            callback(&frame);
        }
    }
    crate::arch::x86::interrupts_ack();
    crate::task::scheduler::after_irq();
}

/// Disable all IRQs on the current CPU (i.e., locally).
///
/// Returns a guard object which re-enables local IRQs when dropped, but only
/// if they were enabled when acquired; nested calls are safe, and only the
/// outermost guard's drop actually re-enables them. Plays nicely with
/// `SpinLock::lock_irq_disabled`, which uses this internally.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled local IRQs.
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
}

impl !Send for DisabledLocalIrqGuard {}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = raw::is_local_enabled();
        if was_enabled {
            raw::disable_local();
        }
        Self { was_enabled }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            raw::enable_local();
        }
    }
}
