//! The trap-and-task substrate's interrupt/exception layer (C4-C6, C9).
//!
//! `init` must run after `vm::init` (needs the frame allocator and a live
//! page table to carve guard-paged stacks) and installs, in order: the
//! exception stacks (`stack`), the GDT/TSS referencing their top addresses
//! (`gdt`), and finally the IDT (`idt`), whose `set_stack_index` calls
//! require the TSS to already be loaded.

mod exception;
mod frame;
mod gdt;
mod idt;
mod irq;
mod stack;

pub use self::exception::{
    is_critical, name, PageFaultInfo, SelectorErrorInfo, SelectorTable, BREAKPOINT, DIVIDE_ERROR,
    GENERAL_PROTECTION_FAULT, INVALID_OPCODE, IRQ_BASE, PAGE_FAULT,
};
pub use self::frame::TrapFrame;
pub use self::idt::{
    clear_override, mode, set_mode, set_override, ExceptionMode, HandlerSlot, OverrideHandler,
};
pub use self::irq::{disable_local, register_irq_handler, DisabledLocalIrqGuard};
pub use self::stack::guard_fault;

pub(crate) fn init() {
    stack::init();
    gdt::init();
    idt::init();
}
