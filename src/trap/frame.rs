//! The register/frame shape handlers see (C5 §3 "Fault frame").
//!
//! The dispatcher is built directly on the `x86_64` crate's native
//! `extern "x86-interrupt"` handlers (SPEC_FULL.md §10.5): the compiler, not
//! hand-written stub code, is responsible for saving and restoring the
//! general-purpose registers a handler body clobbers. What every handler
//! actually needs from the frame, and the only part a test or fault
//! analyzer ever reads or rewrites, is the CPU-pushed IRET frame plus the
//! vector and error code, so `TrapFrame` carries exactly those fields. The
//! load-bearing operation is `set_rip`: mutating the frame before `iret`
//! changes where execution resumes, which is how the fault-injection harness
//! (C9) and panic-free test recoveries redirect control flow.

use x86_64::structures::idt::InterruptStackFrame;

/// A handler's view of the faulting context.
///
/// Built fresh for every dispatch from the CPU-pushed `InterruptStackFrame`
/// plus the vector number and (possibly synthetic) error code; see
/// `trap::idt` for construction.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    pub(super) fn new(vector: u64, error_code: u64, stack_frame: &InterruptStackFrame) -> Self {
        TrapFrame {
            vector,
            error_code,
            rip: stack_frame.instruction_pointer.as_u64(),
            cs: stack_frame.code_segment,
            rflags: stack_frame.cpu_flags,
            rsp: stack_frame.stack_pointer.as_u64(),
            ss: stack_frame.stack_segment,
        }
    }

    /// Redirects resumption to `rip` by rewriting the live interrupt stack
    /// frame in place.
    ///
    /// # Safety
    ///
    /// `stack_frame` must be the same frame the CPU will `iret` from for this
    /// dispatch, and `rip` must point at valid, executable code expecting
    /// whatever machine state is live at resumption.
    pub(super) unsafe fn apply_resume_rip(
        stack_frame: &mut InterruptStackFrame,
        rip: u64,
    ) {
        stack_frame.as_mut().update(|f| {
            f.instruction_pointer = x86_64::VirtAddr::new(rip);
        });
    }
}
