//! Cooperative round-robin scheduler (C8, SPEC_FULL.md §4.7).
//!
//! The ready queue is a fixed-capacity circular FIFO (`config::
//! READY_QUEUE_CAPACITY`), matching the fixed-size task table in
//! `task::task`: nothing in this substrate grows without bound.
//! `schedule()` is guarded against re-entrancy (an IRQ firing mid-switch
//! must not recurse into another switch), and preemption is optional:
//! `on_tick`/`after_irq` only ever set a flag that a later `schedule()`
//! call consumes.

use alloc::vec::Vec;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::{AtomicBool, AtomicUsize};

use log::{debug, trace};
use spin::Once;

use crate::config::READY_QUEUE_CAPACITY;
use crate::prelude::*;
use crate::sync::SpinLock;

use super::priority::Priority;
use super::task::{self, Task, TaskEntry, TaskFlags, TaskId, TaskState};

/// What happens when the idle task itself reaches TERMINATED with an empty
/// ready queue (SPEC_FULL.md §9, "idle-task-termination resolution").
///
/// Production boots never terminate the idle task, so `Halt` is the
/// default; the fault-injection harness runs as ordinary kernel code on the
/// boot stack and wants control back, so it installs `ReturnToBootstrap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleExitMode {
    /// Disable interrupts and spin in `hlt` forever.
    Halt,
    /// Switch back into the context that was current the first time
    /// `schedule()` ever ran (i.e. the kernel's own boot stack).
    ReturnToBootstrap,
}

struct ReadyQueue {
    buf: [TaskId; READY_QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

impl ReadyQueue {
    const fn new() -> Self {
        Self {
            buf: [0; READY_QUEUE_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn enqueue(&mut self, id: TaskId) -> Result<()> {
        if self.len == READY_QUEUE_CAPACITY {
            return Err(Error::ReadyQueueFull);
        }
        let tail = (self.head + self.len) % READY_QUEUE_CAPACITY;
        self.buf[tail] = id;
        self.len += 1;
        Ok(())
    }

    fn dequeue(&mut self) -> Option<TaskId> {
        if self.len == 0 {
            return None;
        }
        let id = self.buf[self.head];
        self.head = (self.head + 1) % READY_QUEUE_CAPACITY;
        self.len -= 1;
        Some(id)
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// O(n): scans for the first occurrence of `id` and drops it, shifting
    /// nothing but the logical order of the remaining entries (rebuilt
    /// starting at index 0).
    fn remove(&mut self, id: TaskId) -> bool {
        let mut found = false;
        let mut kept = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let idx = (self.head + i) % READY_QUEUE_CAPACITY;
            if !found && self.buf[idx] == id {
                found = true;
                continue;
            }
            kept.push(self.buf[idx]);
        }
        self.head = 0;
        self.len = kept.len();
        for (i, v) in kept.into_iter().enumerate() {
            self.buf[i] = v;
        }
        found
    }
}

static READY_QUEUE: SpinLock<ReadyQueue> = SpinLock::new(ReadyQueue::new());

static IDLE_TASK: Once<Arc<Task>> = Once::new();
static EXIT_MODE: SpinLock<IdleExitMode> = SpinLock::new(IdleExitMode::Halt);

/// Re-entrancy depth for `schedule()`. An IRQ that interrupts a switch in
/// progress must not switch again; it only sets `RESCHEDULE_PENDING`.
static SCHEDULING_DEPTH: AtomicUsize = AtomicUsize::new(0);
static RESCHEDULE_PENDING: AtomicBool = AtomicBool::new(false);
static STOPPED: AtomicBool = AtomicBool::new(false);

extern "C" fn idle_entry(_arg: usize) {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Creates the idle task. Must run after `task::init()` and before the
/// first `schedule()` call.
pub(crate) fn init() {
    task::init();
    let idle = task::task_create(
        "idle",
        idle_entry as TaskEntry,
        0,
        Priority::idle(),
        TaskFlags::KERNEL_MODE,
    )
    .expect("failed to create idle task");
    IDLE_TASK.call_once(|| idle);
}

pub fn set_idle_exit_mode(mode: IdleExitMode) {
    *EXIT_MODE.lock() = mode;
}

/// Creates a task and makes it runnable (SPEC_FULL.md §9's `spawn` path,
/// layered on `task::task_create`'s `build` path).
pub fn spawn(
    name: &str,
    entry: TaskEntry,
    arg: usize,
    priority: Priority,
    flags: TaskFlags,
) -> Result<Arc<Task>> {
    let task = task::task_create(name, entry, arg, priority, flags)?;
    enqueue(task.id())?;
    Ok(task)
}

pub(crate) fn enqueue(id: TaskId) -> Result<()> {
    READY_QUEUE.lock().enqueue(id)
}

/// Removes `id` from the ready queue, if present. Called by
/// `task::task_terminate` and `block_current`.
pub(crate) fn remove(id: TaskId) {
    READY_QUEUE.lock().remove(id);
}

/// Moves a blocked task back to READY and re-enqueues it.
pub fn wake(task: &Arc<Task>) {
    if task.state() != TaskState::Blocked {
        return;
    }
    task.transition(TaskState::Ready);
    if enqueue(task.id()).is_err() {
        // Ready queue is full; the task stays READY but unqueued. The next
        // `remove`/`wake` on it, or the periodic tick, will not observe it
        // until some slot frees up. This matches SPEC_FULL.md §7's
        // "ready-queue-full" row: the caller is not blocked forever, but
        // fairness is degraded until the queue drains.
        debug!("wake: ready queue full, task {} left unqueued", task.id());
    }
}

/// Voluntarily gives up the CPU. The current task goes back to READY.
pub fn yield_now() {
    if let Some(current) = super::current_task() {
        current.inner.lock().yield_count += 1;
    }
    schedule();
}

/// Blocks the current task. It is not re-enqueued; only `wake` can make it
/// runnable again.
pub(crate) fn block_current() {
    if let Some(current) = super::current_task() {
        current.transition(TaskState::Blocked);
        remove(current.id());
    }
    schedule();
}

fn is_idle(task: &Arc<Task>) -> bool {
    IDLE_TASK
        .get()
        .map(|idle| core::ptr::eq(idle.as_ref(), task.as_ref()))
        .unwrap_or(false)
}

/// Picks the next task to run: the head of the ready queue, or the idle
/// task if the queue is empty and idle is still alive.
fn select_next() -> Option<Arc<Task>> {
    if let Some(id) = READY_QUEUE.lock().dequeue() {
        if let Some(task) = task::get(id) {
            return Some(task);
        }
    }
    match IDLE_TASK.get() {
        Some(idle) if idle.state() != TaskState::Terminated => Some(idle.clone()),
        _ => None,
    }
}

/// The scheduling entry point (SPEC_FULL.md §4.7). Re-entrant calls (an IRQ
/// firing while a switch is already underway) return immediately instead of
/// recursing.
pub fn schedule() {
    let depth = SCHEDULING_DEPTH.fetch_add(1, Relaxed) + 1;
    if depth > 1 {
        SCHEDULING_DEPTH.fetch_sub(1, Relaxed);
        return;
    }

    if STOPPED.load(Relaxed) {
        SCHEDULING_DEPTH.fetch_sub(1, Relaxed);
        return;
    }

    if let Some(current) = super::current_task() {
        if current.state() == TaskState::Running {
            current.transition(TaskState::Ready);
            {
                let mut inner = current.inner.lock();
                inner.quantum_remaining = crate::config::DEFAULT_QUANTUM_TICKS;
            }
            // The idle task never sits in the ready queue; it is the
            // fallback `select_next` reaches for when the queue is empty.
            if !is_idle(&current) {
                let _ = enqueue(current.id());
            }
        }
    }

    match select_next() {
        Some(next) => {
            trace!("schedule: switching to task {}", next.id());
            super::processor::switch_to(next);
        }
        None => {
            // Idle terminated and the ready queue is empty: there is
            // nothing left to run.
            STOPPED.store(true, Relaxed);
            match *EXIT_MODE.lock() {
                IdleExitMode::Halt => {
                    crate::arch::x86::irq::disable_local();
                    loop {
                        x86_64::instructions::hlt();
                    }
                }
                IdleExitMode::ReturnToBootstrap => {
                    super::processor::return_to_bootstrap();
                }
            }
        }
    }

    SCHEDULING_DEPTH.fetch_sub(1, Relaxed);
}

/// Stops the scheduler (C10 shutdown orchestrator): no further `schedule()`
/// call will switch tasks.
pub(crate) fn stop() {
    STOPPED.store(true, Relaxed);
}

/// Timer-tick bookkeeping (SPEC_FULL.md §4.7 "optional preemption"). Always
/// runs on every timer IRQ; only sets `RESCHEDULE_PENDING` when the current
/// task's quantum has run out and preemption is not disabled for it.
pub(crate) fn on_tick() {
    task::bump_tick();

    let Some(current) = super::current_task() else {
        return;
    };
    if current.flags.contains(TaskFlags::NO_PREEMPT) {
        return;
    }
    if is_idle(&current) && READY_QUEUE.lock().is_empty() {
        return;
    }

    let mut inner = current.inner.lock();
    inner.runtime_ticks += 1;
    if inner.quantum_remaining > 0 {
        inner.quantum_remaining -= 1;
    }
    if inner.quantum_remaining == 0 && !READY_QUEUE.lock().is_empty() {
        RESCHEDULE_PENDING.store(true, Relaxed);
    }
}

/// Runs after every IRQ is fully dispatched (SPEC_FULL.md §4.7). Consumes
/// `RESCHEDULE_PENDING` and calls `schedule()` if it was set and no switch
/// is already underway.
pub(crate) fn after_irq() {
    if SCHEDULING_DEPTH.load(Relaxed) != 0 {
        return;
    }
    if RESCHEDULE_PENDING.swap(false, Relaxed) {
        schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn ready_queue_is_fifo() {
        let mut q = ReadyQueue::new();
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(3).unwrap();
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);
    }

    #[test_case]
    fn ready_queue_remove_preserves_order() {
        let mut q = ReadyQueue::new();
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(3).unwrap();
        assert!(q.remove(2));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(3));
    }

    #[test_case]
    fn ready_queue_rejects_over_capacity() {
        let mut q = ReadyQueue::new();
        for i in 0..READY_QUEUE_CAPACITY {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.enqueue(999), Err(Error::ReadyQueueFull));
    }
}
