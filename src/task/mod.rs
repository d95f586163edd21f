//! The trap-and-task substrate's task layer: task control blocks (C7) and
//! the cooperative round-robin scheduler (C8).

mod preempt;
mod priority;
mod processor;
pub(crate) mod scheduler;
#[allow(clippy::module_inception)]
mod task;

pub use self::preempt::{disable_preempt, in_atomic, in_irq, preemptible, DisablePreemptGuard};
pub use self::priority::Priority;
pub use self::processor::{current_task, preempt};
pub(crate) use self::processor::clear_current;
pub use self::scheduler::{schedule, set_idle_exit_mode, spawn, wake, yield_now, IdleExitMode};
pub(crate) use self::scheduler::{init as scheduler_init, stop as scheduler_stop};
pub use self::task::{
    task_create, task_shutdown_all, task_terminate, task_wait_for, Task, TaskFlags, TaskId,
    TaskState,
};

/// Brings up the task layer: the fixed-size task table, the idle task, and
/// the scheduler's ready queue. Must run after `vm::init` and `trap::init`.
pub(crate) fn init() {
    scheduler_init();
}
