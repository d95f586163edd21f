//! IDT construction and exception dispatch (C5, SPEC_FULL.md §4.5).
//!
//! Built directly on `x86_64`'s native `extern "x86-interrupt"` handlers
//! rather than the `trapframe` crate (§10.5): each vector gets its own
//! compiler-generated stub, and every stub forwards into the single
//! [`dispatch`] function below. `InterruptDescriptorTable::set_stack_index`
//! wires the four guard-paged stacks `trap::stack` carved to the vectors
//! that need them.

use lazy_static::lazy_static;
use log::{error, warn};
use x86_64::structures::idt::{
    InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode,
};

use crate::sync::SpinLock;

use super::exception::{self, PageFaultInfo, SelectorErrorInfo};
use super::frame::TrapFrame;
use super::stack::{self, DOUBLE_FAULT_IST, MACHINE_CHECK_IST, NMI_IST, PAGE_FAULT_IST};

/// A handler invoked once the dispatcher has decided not to hand the fault
/// to a TEST-mode override. Never returns; it always panics.
pub type PanicHandler = fn(&TrapFrame);

/// A TEST-mode handler that may consume the fault. Returning `true` means
/// the fault was handled (RIP has been rewritten, or was fine as-is) and
/// the dispatcher must not panic; `false` means it could not and the
/// dispatcher falls through to the panic handler.
pub type OverrideHandler = fn(&mut TrapFrame) -> bool;

/// The two routing modes C9 switches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionMode {
    Normal,
    Test,
}

/// The resolved handler for a dispatch, per §4.5 step 4's precedence.
pub enum HandlerSlot {
    Override(OverrideHandler),
    Panic(PanicHandler),
    Default,
}

const NUM_VECTORS: usize = 32;

#[derive(Clone, Copy, Default)]
struct VectorState {
    panic: Option<PanicHandler>,
    override_: Option<OverrideHandler>,
}

struct IdtState {
    mode: ExceptionMode,
    vectors: [VectorState; NUM_VECTORS],
}

static STATE: SpinLock<IdtState> = SpinLock::new(IdtState {
    mode: ExceptionMode::Normal,
    vectors: [VectorState {
        panic: None,
        override_: None,
    }; NUM_VECTORS],
});

/// Registers the default panic analyzer for a non-critical vector. Called
/// once at boot for page-fault and general-protection-fault, which need
/// specialized decoding; every other vector falls back to a generic dump.
pub(crate) fn set_panic_handler(vector: u8, handler: PanicHandler) {
    let mut state = STATE.lock_irq_disabled();
    state.vectors[vector as usize].panic = Some(handler);
}

/// Installs a TEST-mode override on `vector`. Refused for critical vectors
/// and for any vector outside the exception range (§4.5).
pub fn set_override(vector: u8, handler: OverrideHandler) -> crate::prelude::Result<()> {
    if vector as usize >= NUM_VECTORS || exception::is_critical(vector) {
        return Err(crate::error::Error::Refused);
    }
    let mut state = STATE.lock_irq_disabled();
    state.vectors[vector as usize].override_ = Some(handler);
    Ok(())
}

/// Removes any override installed on `vector`.
pub fn clear_override(vector: u8) {
    if (vector as usize) < NUM_VECTORS {
        let mut state = STATE.lock_irq_disabled();
        state.vectors[vector as usize].override_ = None;
    }
}

/// Switches the global routing mode. Switching TEST → NORMAL atomically
/// clears every installed override (§4.5).
pub fn set_mode(mode: ExceptionMode) {
    let mut state = STATE.lock_irq_disabled();
    state.mode = mode;
    if mode == ExceptionMode::Normal {
        for v in state.vectors.iter_mut() {
            v.override_ = None;
        }
    }
}

pub fn mode() -> ExceptionMode {
    STATE.lock_irq_disabled().mode
}

fn resolve(vector: u8) -> HandlerSlot {
    let state = STATE.lock();
    let critical = exception::is_critical(vector);
    let slot = &state.vectors[vector as usize];
    if !critical && state.mode == ExceptionMode::Test {
        if let Some(h) = slot.override_ {
            return HandlerSlot::Override(h);
        }
    }
    if let Some(h) = slot.panic {
        return HandlerSlot::Panic(h);
    }
    HandlerSlot::Default
}

/// Shared entry point every exception stub forwards into.
fn dispatch(vector: u8, error_code: u64, stack_frame: &mut InterruptStackFrame) {
    let critical = exception::is_critical(vector);
    if critical || mode() != ExceptionMode::Test {
        error!(
            "trap: exception {} ({:#x}) at rip={:#x} error_code={:#x}",
            exception::name(vector),
            vector,
            stack_frame.instruction_pointer.as_u64(),
            error_code
        );
    }

    let mut frame = TrapFrame::new(vector as u64, error_code, stack_frame);
    match resolve(vector) {
        HandlerSlot::Override(handler) => {
            if !handler(&mut frame) {
                default_panic(&frame);
            } else {
                // Safety: `stack_frame` is the live frame for this dispatch.
                unsafe { TrapFrame::apply_resume_rip(stack_frame, frame.rip) };
            }
        }
        HandlerSlot::Panic(handler) => handler(&frame),
        HandlerSlot::Default => default_panic(&frame),
    }
}

fn default_panic(frame: &TrapFrame) -> ! {
    panic!(
        "unhandled {} (vector {}) at rip={:#x} error_code={:#x}",
        exception::name(frame.vector as u8),
        frame.vector,
        frame.rip,
        frame.error_code
    );
}

fn page_fault_panic(frame: &TrapFrame) {
    let fault_addr = x86_64::registers::control::Cr2::read().as_u64() as usize;
    if let Some(owner) = stack::guard_fault(fault_addr) {
        panic!("exception stack overflow: guard page of {:?} hit at {:#x}", owner, fault_addr);
    }
    let info = PageFaultInfo::decode(frame.error_code);
    panic!(
        "page fault at {:#x} (rip={:#x}): present={} write={} user={} reserved_write={} instruction_fetch={}",
        fault_addr,
        frame.rip,
        info.present,
        info.write,
        info.user,
        info.reserved_write,
        info.instruction_fetch
    );
}

fn general_protection_panic(frame: &TrapFrame) {
    let info = SelectorErrorInfo::decode(frame.error_code);
    panic!(
        "general protection fault at rip={:#x}: selector table={:?} index={}",
        frame.rip, info.table, info.selector_index
    );
}

macro_rules! exception_stub_no_error_code {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(mut stack_frame: InterruptStackFrame) {
            dispatch($vector, 0, &mut stack_frame);
        }
    };
}

macro_rules! exception_stub_with_error_code {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(mut stack_frame: InterruptStackFrame, error_code: u64) {
            dispatch($vector, error_code, &mut stack_frame);
        }
    };
}

exception_stub_no_error_code!(divide_error_handler, exception::DIVIDE_ERROR);
exception_stub_no_error_code!(debug_handler, exception::DEBUG);
exception_stub_no_error_code!(breakpoint_handler, exception::BREAKPOINT);
exception_stub_no_error_code!(overflow_handler, exception::OVERFLOW);
exception_stub_no_error_code!(bound_range_exceeded_handler, exception::BOUND_RANGE_EXCEEDED);
exception_stub_no_error_code!(invalid_opcode_handler, exception::INVALID_OPCODE);
exception_stub_no_error_code!(device_not_available_handler, exception::DEVICE_NOT_AVAILABLE);
exception_stub_with_error_code!(invalid_tss_handler, exception::INVALID_TSS);
exception_stub_with_error_code!(segment_not_present_handler, exception::SEGMENT_NOT_PRESENT);
exception_stub_with_error_code!(stack_segment_fault_handler, exception::STACK_SEGMENT_FAULT);
exception_stub_with_error_code!(general_protection_fault_handler, exception::GENERAL_PROTECTION_FAULT);
exception_stub_no_error_code!(x87_floating_point_handler, exception::X87_FLOATING_POINT);
exception_stub_with_error_code!(alignment_check_handler, exception::ALIGNMENT_CHECK);
exception_stub_no_error_code!(simd_floating_point_handler, exception::SIMD_FLOATING_POINT);
exception_stub_no_error_code!(virtualization_handler, exception::VIRTUALIZATION);

extern "x86-interrupt" fn nmi_handler(mut stack_frame: InterruptStackFrame) {
    dispatch(exception::NON_MASKABLE_INTERRUPT, 0, &mut stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    mut stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    dispatch(exception::PAGE_FAULT, error_code.bits(), &mut stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    error!(
        "trap: double fault at rip={:#x} error_code={:#x}",
        stack_frame.instruction_pointer.as_u64(),
        error_code
    );
    panic!("double fault (not overridable)");
}

extern "x86-interrupt" fn machine_check_handler(stack_frame: InterruptStackFrame) -> ! {
    error!(
        "trap: machine check at rip={:#x}",
        stack_frame.instruction_pointer.as_u64()
    );
    panic!("machine check (not overridable)");
}

/// IRQs 32-47 forward into the same dispatch function with vector >=
/// `IRQ_BASE`; `trap::irq` decides what to do with them (§4.5 step 2).
macro_rules! irq_stub {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
            super::irq::dispatch($vector, &stack_frame);
        }
    };
}

irq_stub!(irq_32_handler, 32);
irq_stub!(irq_33_handler, 33);
irq_stub!(irq_34_handler, 34);
irq_stub!(irq_35_handler, 35);
irq_stub!(irq_36_handler, 36);
irq_stub!(irq_37_handler, 37);
irq_stub!(irq_38_handler, 38);
irq_stub!(irq_39_handler, 39);
irq_stub!(irq_40_handler, 40);
irq_stub!(irq_41_handler, 41);
irq_stub!(irq_42_handler, 42);
irq_stub!(irq_43_handler, 43);
irq_stub!(irq_44_handler, 44);
irq_stub!(irq_45_handler, 45);
irq_stub!(irq_46_handler, 46);
irq_stub!(irq_47_handler, 47);

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        unsafe {
            idt.non_maskable_interrupt
                .set_handler_fn(nmi_handler)
                .set_stack_index(NMI_IST);
        }
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(DOUBLE_FAULT_IST);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(PAGE_FAULT_IST);
        }
        idt.x87_floating_point.set_handler_fn(x87_floating_point_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        unsafe {
            idt.machine_check
                .set_handler_fn(machine_check_handler)
                .set_stack_index(MACHINE_CHECK_IST);
        }
        idt.simd_floating_point.set_handler_fn(simd_floating_point_handler);
        idt.virtualization.set_handler_fn(virtualization_handler);

        idt[32].set_handler_fn(irq_32_handler);
        idt[33].set_handler_fn(irq_33_handler);
        idt[34].set_handler_fn(irq_34_handler);
        idt[35].set_handler_fn(irq_35_handler);
        idt[36].set_handler_fn(irq_36_handler);
        idt[37].set_handler_fn(irq_37_handler);
        idt[38].set_handler_fn(irq_38_handler);
        idt[39].set_handler_fn(irq_39_handler);
        idt[40].set_handler_fn(irq_40_handler);
        idt[41].set_handler_fn(irq_41_handler);
        idt[42].set_handler_fn(irq_42_handler);
        idt[43].set_handler_fn(irq_43_handler);
        idt[44].set_handler_fn(irq_44_handler);
        idt[45].set_handler_fn(irq_45_handler);
        idt[46].set_handler_fn(irq_46_handler);
        idt[47].set_handler_fn(irq_47_handler);
        idt
    };
}

/// Loads the IDT and registers the specialized panic analyzers for
/// page-fault and general-protection-fault. Must run after `trap::gdt::init`
/// (the IST indices above must reference a loaded TSS).
pub(crate) fn init() {
    IDT.load();
    set_panic_handler(exception::PAGE_FAULT, page_fault_panic);
    set_panic_handler(exception::GENERAL_PROTECTION_FAULT, general_protection_panic);
    warn!("trap: idt loaded, {} exception vectors + 16 irq vectors", NUM_VECTORS);
}
