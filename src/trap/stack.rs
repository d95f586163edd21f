//! Guard-paged exception stacks (C4, SPEC_FULL.md §4.4).
//!
//! Each named stack gets `EXCEPTION_STACK_SIZE` of present, writable pages
//! plus one unmapped guard page directly below them. A fault whose address
//! lands inside a guard page is exception-stack overflow, not an ordinary
//! page fault, and the dispatcher (`trap::idt`) consults `guard_fault`
//! before falling through to the generic page-fault path.

use alloc::vec::Vec;
use log::debug;
use spin::Once;

use crate::arch::mm::PageTableEntry;
use crate::config::{EXCEPTION_STACK_SIZE, EXCEPTION_STACK_VA_BASE, NUM_EXCEPTION_STACKS, PAGE_SIZE};
use crate::prelude::Result;
use crate::vm::page_table::{current_page_table, PageTableFlagsTrait};
use crate::vm::{PageTable, VmAllocOptions, Vaddr};

/// TSS IST slot each stack is wired to (`trap::gdt`, `trap::idt`).
pub const DOUBLE_FAULT_IST: u16 = 0;
pub const PAGE_FAULT_IST: u16 = 1;
pub const NMI_IST: u16 = 2;
pub const MACHINE_CHECK_IST: u16 = 3;

const STACK_NAMES: [&str; NUM_EXCEPTION_STACKS] = [
    "double-fault-stack",
    "page-fault-stack",
    "nmi-stack",
    "machine-check-stack",
];

#[derive(Debug, Clone, Copy)]
pub struct ExceptionStack {
    pub name: &'static str,
    /// Lowest address of the usable (mapped) range; the guard page sits
    /// immediately below it.
    pub base: Vaddr,
    pub size: usize,
    pub guard_vaddr: Vaddr,
}

impl ExceptionStack {
    pub fn top(&self) -> Vaddr {
        self.base + self.size
    }
}

static STACKS: Once<Vec<ExceptionStack>> = Once::new();

/// Allocates and maps every named exception stack. Must run after `vm::init`
/// (needs the frame allocator and a live page table) and before
/// `trap::gdt::init` (the TSS reads stack tops from here).
pub(crate) fn init() {
    let mut pt = current_page_table();
    let mut stacks = Vec::with_capacity(NUM_EXCEPTION_STACKS);
    for (slot, name) in STACK_NAMES.iter().enumerate() {
        let stack = carve(&mut pt, slot, name).expect("failed to carve exception stack");
        stacks.push(stack);
    }
    // The stacks live at a fresh top-level VA range; fold the newly-created
    // top-level entry into the kernel snapshot so address spaces created
    // from here on still inherit it (C3 §4.3).
    crate::arch::mm::resnapshot(pt.root_paddr());
    STACKS.call_once(|| stacks);
}

fn carve(
    pt: &mut PageTable<PageTableEntry>,
    slot: usize,
    name: &'static str,
) -> Result<ExceptionStack> {
    let n_pages = EXCEPTION_STACK_SIZE / PAGE_SIZE;
    let mut frames = VmAllocOptions::new(n_pages).is_contiguous(true).alloc_contiguous()?;
    let base_paddr = frames.get(0).unwrap().start_paddr();
    // These frames back a permanent kernel structure; they are never
    // returned to C1 individually (the same convention the heap arena uses).
    for frame in frames.into_iter() {
        core::mem::forget(frame);
    }

    let stride = EXCEPTION_STACK_SIZE + PAGE_SIZE;
    let guard_vaddr = EXCEPTION_STACK_VA_BASE + slot * stride;
    let base = guard_vaddr + PAGE_SIZE;
    let flags = PageTableEntryFlags::new().set_present(true).set_writable(true);
    for page in 0..n_pages {
        let vaddr = base + page * PAGE_SIZE;
        let paddr = base_paddr + page * PAGE_SIZE;
        pt.map(vaddr, paddr, flags)
            .map_err(|_| crate::error::Error::AlreadyMapped)?;
    }

    debug!(
        "trap: exception stack {:?} mapped {:#x}..{:#x}, guard {:#x}",
        name,
        base,
        base + EXCEPTION_STACK_SIZE,
        guard_vaddr
    );
    Ok(ExceptionStack {
        name,
        base,
        size: EXCEPTION_STACK_SIZE,
        guard_vaddr,
    })
}

type PageTableEntryFlags = crate::arch::mm::PageTableFlags;

/// Looks up which exception stack's guard page, if any, contains
/// `fault_addr`. A hit means exception-stack overflow.
pub fn guard_fault(fault_addr: Vaddr) -> Option<&'static str> {
    let stacks = STACKS.get()?;
    stacks
        .iter()
        .find(|s| fault_addr >= s.guard_vaddr && fault_addr < s.guard_vaddr + PAGE_SIZE)
        .map(|s| s.name)
}

/// The top (highest address) of the named IST slot's stack, for wiring into
/// the TSS. Panics if called before `init`.
pub(crate) fn stack_top(slot: usize) -> Vaddr {
    STACKS.get().expect("trap::stack::init must run before trap::gdt::init")[slot].top()
}
