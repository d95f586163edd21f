#![allow(unused)]

use log::Level;

pub const USER_STACK_SIZE: usize = PAGE_SIZE * 4;
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 64;
pub const KERNEL_HEAP_SIZE: usize = 0x4_000_000;

pub const KERNEL_OFFSET: usize = 0xffffffff80000000;

pub const PHYS_OFFSET: usize = 0xFFFF800000000000;
pub const ENTRY_COUNT: usize = 512;

pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_SIZE_BITS: usize = 0xc;

pub const KVA_START: usize = (usize::MAX) << PAGE_SIZE_BITS;

pub const DEFAULT_LOG_LEVEL: Level = Level::Error;
/// The base timer frequency in Hz that the PIT is programmed to.
pub const TIMER_FREQ: u64 = 500;

// --- trap-and-task substrate (SPEC_FULL.md §10.3) ---

/// Size of each guard-paged exception stack (C4), excluding the guard page
/// itself.
pub const EXCEPTION_STACK_SIZE: usize = PAGE_SIZE * 16;

/// Base of the virtual-address window `trap::stack` carves exception stacks
/// out of. Chosen below `PHYS_OFFSET` so the HHDM fast path in
/// `vm::vaddr_to_paddr` never mistakes a stack address for a direct-mapped
/// one; each slot gets its own guard page plus `EXCEPTION_STACK_SIZE`.
pub const EXCEPTION_STACK_VA_BASE: usize = 0xFFFF_7000_0000_0000;

/// Number of named exception-stack slots the manager in `trap::stack`
/// pre-allocates (one each for double-fault, page-fault, NMI, and
/// machine-check).
pub const NUM_EXCEPTION_STACKS: usize = 4;

/// Upper bound on live tasks (C7). The task table is a fixed-size array, not
/// a growable allocation, so lookups and iteration are O(1)/O(MAX_TASKS).
pub const MAX_TASKS: usize = 128;

/// Capacity of the scheduler's ready-queue FIFO (C8).
pub const READY_QUEUE_CAPACITY: usize = MAX_TASKS;

/// Timer ticks a task may run before becoming eligible for preemption, when
/// preemption is enabled.
pub const DEFAULT_QUANTUM_TICKS: u32 = 5;

/// Base frequency (Hz) assumed for TSC-derived wall-clock timeouts (C9) when
/// CPUID does not report one.
pub const FALLBACK_TSC_FREQ_HZ: u64 = 3_000_000_000;

/// Scratch virtual-address window the fault-injection harness's memory
/// suite (C9) maps and unmaps single pages in. Distinct from
/// `EXCEPTION_STACK_VA_BASE` so the two carvers never collide.
pub const TEST_HARNESS_VA_BASE: usize = 0xFFFF_6000_0000_0000;
