//! The current-task pointer and the mechanics of switching between tasks.
//!
//! Single-core only (see `task::preempt`'s module doc for the same call),
//! so "current task" is one global slot rather than per-CPU storage.

use alloc::sync::Arc;

use crate::sync::SpinLock;
use crate::trap::disable_local;

use super::task::{context_switch, current_tick, CalleeRegs, Task, TaskContext, TaskState};

static CURRENT: SpinLock<Option<Arc<Task>>> = SpinLock::new(None);

/// The context captured the first time a switch runs with no current task,
/// i.e. the kernel's own boot stack before any task has ever run.
/// `scheduler::IdleExitMode::ReturnToBootstrap` switches back into this when
/// the idle task itself terminates.
static BOOTSTRAP_CTX: SpinLock<TaskContext> = SpinLock::new(TaskContext {
    regs: CalleeRegs {
        rsp: 0,
        rbx: 0,
        rbp: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
    },
});

pub fn current_task() -> Option<Arc<Task>> {
    CURRENT.lock().clone()
}

/// Clears the current-task pointer (C10 shutdown orchestrator, SPEC_FULL.md
/// §4.9). Nothing is ever switched back into once this runs; it just stops
/// `current_task()` from handing out a handle to a task that shutdown is
/// about to tear down.
pub(crate) fn clear_current() {
    CURRENT.lock().take();
}

/// Whether the scheduler should consider preempting the current task
/// (quantum expired, preemption enabled). Used by `trap::irq`'s dispatcher
/// before deciding whether to call `task::scheduler::after_irq`'s
/// follow-on `schedule()` eagerly rather than waiting.
pub fn preempt() {
    let _irq_guard = disable_local();
    super::scheduler::schedule();
}

/// Switches execution to `next`, saving the outgoing context into whatever
/// was current (a task, or the bootstrap stack on the very first switch).
///
/// Must run with local interrupts disabled; `scheduler::schedule` is always
/// called either from task context with the re-entrancy guard held, or from
/// the IRQ dispatcher, both of which satisfy this.
pub(crate) fn switch_to(next: Arc<Task>) {
    next.transition(TaskState::Running);
    {
        let mut inner = next.inner.lock();
        inner.last_run_tick = current_tick();
    }
    let next_ctx_ptr = &next.inner.lock().ctx as *const TaskContext;

    // `prev` is kept alive across the switch by ordinary stack-frame scope:
    // `context_switch` only "returns" into this frame once something
    // switches back into it, so `prev` is still right here when it does,
    // and the raw pointer into its `inner.ctx` (stable for as long as the
    // `Arc` lives, since `SpinLock`'s `UnsafeCell` never moves) stays valid
    // for the whole pause.
    let prev = CURRENT.lock().replace(next);
    let prev_ctx_ptr: *mut TaskContext = match &prev {
        Some(prev_task) => &mut prev_task.inner.lock().ctx as *mut TaskContext,
        None => &mut *BOOTSTRAP_CTX.lock() as *mut TaskContext,
    };

    unsafe {
        context_switch(prev_ctx_ptr, next_ctx_ptr);
    }
}

/// Switches back into the context captured by the very first `switch_to`
/// call (SPEC_FULL.md §9, `IdleExitMode::ReturnToBootstrap`).
pub(crate) fn return_to_bootstrap() {
    let prev = CURRENT.lock().take();
    let prev_ctx_ptr: *mut TaskContext = match &prev {
        Some(prev_task) => &mut prev_task.inner.lock().ctx as *mut TaskContext,
        None => &mut *BOOTSTRAP_CTX.lock() as *mut TaskContext,
    };
    let bootstrap_ptr = &*BOOTSTRAP_CTX.lock() as *const TaskContext;
    unsafe {
        context_switch(prev_ctx_ptr, bootstrap_ptr);
    }
}
