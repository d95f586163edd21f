//! Task control blocks (C7, SPEC_FULL.md §3 "Task control block", §4.6).
//!
//! A task is a CPU context plus a stack plus bookkeeping, kept in a
//! fixed-size table (`config::MAX_TASKS`) so lookup by id is O(1). The
//! context switch itself is the teacher's callee-saved-register scheme
//! (`CalleeRegs`/`TaskContext`, `context_switch`): only the six
//! callee-saved GPRs plus the stack pointer cross a switch, because every
//! switch happens through an ordinary function call (`schedule` ->
//! `switch_to` -> `context_switch`), so the compiler has already spilled
//! everything else the caller needs across the call.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::{debug, warn};

use crate::config::{KERNEL_STACK_SIZE, MAX_TASKS, PAGE_SIZE};
use crate::prelude::*;
use crate::sync::SpinLock;
use crate::vm::{AddressSpace, Paddr, Vaddr, VmaFlags};

use super::priority::Priority;

core::arch::global_asm!(
    r#"
.global context_switch
context_switch:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rdi], rsp

    mov rsp, [rsi]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret
"#
);

#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct CalleeRegs {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub(crate) struct TaskContext {
    pub regs: CalleeRegs,
}

extern "C" {
    /// Saves the callee-saved registers and `rsp` into `*cur`, then restores
    /// them from `*nxt` and returns. For a brand-new task, `nxt.regs.rsp`
    /// points at a fabricated stack (`fabricate_stack`) whose topmost
    /// 8-byte slot is a return address (`kernel_task_entry`), so the final
    /// `ret` above lands there instead of back in the caller of
    /// `context_switch`.
    pub(crate) fn context_switch(cur: *mut TaskContext, nxt: *const TaskContext);
}

bitflags! {
    pub struct TaskFlags: u32 {
        const KERNEL_MODE = 1 << 0;
        const USER_MODE   = 1 << 1;
        const NO_PREEMPT  = 1 << 2;
        const SYSTEM      = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Invalid,
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl TaskState {
    /// Whether `self -> next` is a legal edge of the state machine in
    /// SPEC_FULL.md §3.
    fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Invalid, Ready)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Blocked)
                | (Blocked, Ready)
                | (Ready, Terminated)
                | (Running, Terminated)
                | (Blocked, Terminated)
                | (Terminated, Invalid)
        )
    }
}

pub type TaskId = usize;

pub type TaskEntry = extern "C" fn(usize);

/// A task's stack, owned until the task is destroyed.
enum TaskStack {
    /// Kernel-mode tasks get their stack from C2 (SPEC_FULL.md §4.6).
    Kernel {
        base: *mut u8,
        layout: alloc::alloc::Layout,
    },
    /// User-mode tasks get an eagerly-mapped VMA in a private address space.
    User {
        space: Arc<AddressSpace>,
        top: Vaddr,
    },
}

// Safety: a TaskStack is only ever touched by its owning Task, and the
// scheduler ensures only one task runs at a time.
unsafe impl Send for TaskStack {}
unsafe impl Sync for TaskStack {}

impl TaskStack {
    fn new_kernel() -> Result<Self> {
        let layout = alloc::alloc::Layout::from_size_align(KERNEL_STACK_SIZE, PAGE_SIZE)
            .map_err(|_| Error::InvalidArgs)?;
        let base = unsafe { alloc::alloc::alloc(layout) };
        if base.is_null() {
            return Err(Error::NoMemory);
        }
        Ok(Self::Kernel { base, layout })
    }

    fn new_user(owner_pid: u64) -> Result<Self> {
        let space = AddressSpace::new(Some(owner_pid));
        // Arbitrary private-half window for the initial stack; a real
        // loader would negotiate this, which is out of scope here.
        const USER_STACK_BASE: Vaddr = 0x0000_7000_0000_0000;
        let size = crate::config::USER_STACK_SIZE;
        space.add_vma(USER_STACK_BASE, size, VmaFlags::READ | VmaFlags::WRITE)?;
        space.populate_vma(USER_STACK_BASE)?;
        Ok(Self::User {
            space,
            top: USER_STACK_BASE + size,
        })
    }

    fn top(&self) -> Vaddr {
        match self {
            Self::Kernel { base, layout } => *base as Vaddr + layout.size(),
            Self::User { top, .. } => *top,
        }
    }

    fn address_space(&self) -> Option<&Arc<AddressSpace>> {
        match self {
            Self::Kernel { .. } => None,
            Self::User { space, .. } => Some(space),
        }
    }
}

impl Drop for TaskStack {
    fn drop(&mut self) {
        if let Self::Kernel { base, layout } = self {
            unsafe { alloc::alloc::dealloc(*base, *layout) };
        }
        // User stacks are released when the owning `AddressSpace`'s VMAs
        // drop, which happens when `space`'s last `Arc` handle goes away.
    }
}

pub(crate) struct TaskInner {
    pub state: TaskState,
    pub ctx: TaskContext,
    pub quantum_remaining: u32,
    pub runtime_ticks: u64,
    pub yield_count: u64,
    pub last_run_tick: u64,
    pub waiting_on: Option<TaskId>,
}

pub struct Task {
    pub(crate) id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub flags: TaskFlags,
    pub owner_pid: Option<u64>,
    pub creation_tick: u64,
    stack: TaskStack,
    entry: TaskEntry,
    arg: usize,
    pub(crate) inner: SpinLock<TaskInner>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn is_kernel_mode(&self) -> bool {
        self.flags.contains(TaskFlags::KERNEL_MODE)
    }

    pub fn cr3(&self) -> Paddr {
        match self.stack.address_space() {
            Some(space) => space.root_paddr(),
            None => crate::vm::page_table::current_page_table().root_paddr(),
        }
    }

    pub(crate) fn stack_top(&self) -> Vaddr {
        self.stack.top()
    }

    /// Applies a checked state transition, logging (but still applying)
    /// illegal edges so shutdown sequences never deadlock (SPEC_FULL.md
    /// §4.6: "the transition itself still proceeds to avoid deadlock").
    pub(crate) fn transition(&self, next: TaskState) {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(next) {
            warn!(
                "task {} ({}): illegal state transition {:?} -> {:?}",
                self.id, self.name, inner.state, next
            );
        }
        inner.state = next;
    }
}

static NEXT_TICK: AtomicU64 = AtomicU64::new(0);

pub(crate) fn bump_tick() -> u64 {
    NEXT_TICK.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn current_tick() -> u64 {
    NEXT_TICK.load(Ordering::Relaxed)
}

static TASK_TABLE: SpinLock<Vec<Option<Arc<Task>>>> = SpinLock::new(Vec::new());

pub(crate) fn init() {
    let mut table = TASK_TABLE.lock();
    if table.is_empty() {
        table.resize_with(MAX_TASKS, || None);
    }
}

/// Entry point every fabricated task stack is wired to land in via `ret`
/// (see `fabricate_stack` and `context_switch`'s doc comment).
extern "C" fn kernel_task_entry() -> ! {
    let task = super::current_task().expect("kernel_task_entry: no current task");
    (task.entry)(task.arg);
    task_terminate(None);
    // `task_terminate` only updates bookkeeping for the current task; it
    // never switches away, since most callers terminate some other task
    // and must return to their own caller. The self-exit path has no
    // caller to return to, so it must hand the CPU off itself.
    loop {
        super::scheduler::schedule();
    }
}

/// Lays out a brand-new task's stack so that the first `context_switch`
/// into it lands in `kernel_task_entry` via an ordinary `ret`, with all
/// callee-saved registers zeroed.
fn fabricate_stack(top: Vaddr) -> TaskContext {
    let mut sp = top & !0xf; // 16-byte align, like a real call boundary
    sp -= 8;
    unsafe { (sp as *mut u64).write(kernel_task_entry as usize as u64) };
    let mut ctx = TaskContext::default();
    ctx.regs.rsp = sp as u64;
    ctx
}

/// Creates a task, leaving it in state READY and inserted into the table,
/// but not yet enqueued on the scheduler's ready queue (SPEC_FULL.md §9,
/// "dual task-creation paths": a caller that also wants it runnable uses
/// `scheduler::spawn`, which calls this and then enqueues).
pub(crate) fn task_create(
    name: &str,
    entry: TaskEntry,
    arg: usize,
    priority: Priority,
    flags: TaskFlags,
) -> Result<Arc<Task>> {
    let stack = if flags.contains(TaskFlags::KERNEL_MODE) {
        TaskStack::new_kernel()?
    } else {
        TaskStack::new_user(0)?
    };
    let owner_pid = stack.address_space().and_then(|s| s.owner_pid());
    let ctx = fabricate_stack(stack.top());

    let mut table = TASK_TABLE.lock();
    let slot = table
        .iter()
        .position(|t| t.is_none())
        .ok_or(Error::NotEnoughResources)?;

    let task = Arc::new(Task {
        id: slot,
        name: String::from(name),
        priority,
        flags,
        owner_pid,
        creation_tick: current_tick(),
        stack,
        entry,
        arg,
        inner: SpinLock::new(TaskInner {
            state: TaskState::Invalid,
            ctx,
            quantum_remaining: crate::config::DEFAULT_QUANTUM_TICKS,
            runtime_ticks: 0,
            yield_count: 0,
            last_run_tick: 0,
            waiting_on: None,
        }),
    });
    task.transition(TaskState::Ready);
    debug!("task {} ({}) created", task.id, task.name);
    table[slot] = Some(task.clone());
    Ok(task)
}

pub(crate) fn get(id: TaskId) -> Option<Arc<Task>> {
    TASK_TABLE.lock().get(id).cloned().flatten()
}

/// Terminates a task (SPEC_FULL.md §4.6). `id = None` means the caller
/// itself. Idempotent: terminating an already-terminated or already-freed
/// slot succeeds silently.
pub fn task_terminate(id: Option<TaskId>) {
    let id = match id.or_else(|| super::current_task().map(|t| t.id())) {
        Some(id) => id,
        None => return,
    };
    let Some(task) = get(id) else { return };

    {
        let mut inner = task.inner.lock();
        if inner.state == TaskState::Terminated || inner.state == TaskState::Invalid {
            return;
        }
        if inner.state == TaskState::Running {
            inner.runtime_ticks += current_tick().saturating_sub(inner.last_run_tick);
        }
    }
    task.transition(TaskState::Terminated);
    super::scheduler::remove(id);
    debug!("task {} ({}) terminated", task.id, task.name);

    // Wake every waiter blocked on this task (§4.6).
    {
        let table = TASK_TABLE.lock();
        for waiter in table.iter().flatten() {
            let should_wake = waiter.inner.lock().waiting_on == Some(id);
            if should_wake {
                super::scheduler::wake(waiter);
            }
        }
    }

    task.transition(TaskState::Invalid);
    TASK_TABLE.lock()[id] = None;
}

/// Blocks the caller until `other` reaches TERMINATED or is already gone.
pub fn task_wait_for(other: TaskId) {
    loop {
        let Some(task) = get(other) else { return };
        if task.state() == TaskState::Terminated {
            return;
        }
        let Some(current) = super::current_task() else { return };
        current.inner.lock().waiting_on = Some(other);
        super::scheduler::block_current();
        current.inner.lock().waiting_on = None;
    }
}

/// Terminates every task except the caller (SPEC_FULL.md §4.6, used by
/// C10's shutdown orchestrator).
pub fn task_shutdown_all() {
    let current_id = super::current_task().map(|t| t.id());
    let ids: Vec<TaskId> = TASK_TABLE
        .lock()
        .iter()
        .flatten()
        .map(|t| t.id)
        .filter(|id| Some(*id) != current_id)
        .collect();
    for id in ids {
        task_terminate(Some(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn legal_transitions_are_accepted() {
        assert!(TaskState::Invalid.can_transition_to(TaskState::Ready));
        assert!(TaskState::Ready.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Blocked));
        assert!(TaskState::Blocked.can_transition_to(TaskState::Ready));
        assert!(TaskState::Running.can_transition_to(TaskState::Terminated));
        assert!(TaskState::Terminated.can_transition_to(TaskState::Invalid));
    }

    #[test_case]
    fn illegal_transitions_are_rejected() {
        assert!(!TaskState::Invalid.can_transition_to(TaskState::Running));
        assert!(!TaskState::Terminated.can_transition_to(TaskState::Ready));
        assert!(!TaskState::Ready.can_transition_to(TaskState::Blocked));
    }
}
