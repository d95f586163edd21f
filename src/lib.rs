//! The trap-and-task substrate of a small x86_64 higher-half kernel
//! (SPEC_FULL.md §1): the IDT and exception dispatch, the guard-paged
//! exception-stack manager, the cooperative round-robin scheduler, per-task
//! address spaces backed by the page and heap allocators, and the
//! fault-injection test harness that exercises the dispatcher on the same
//! CPU it is testing.
//!
//! This crate only boots itself as far as a runnable idle task (and, if the
//! command line asks for it, the test harness). A boot protocol handshake
//! beyond handing Limine's responses to `boot`, ACPI parsing, device
//! drivers beyond the serial console, and a shell are all out of scope
//! (§1): external collaborators this crate exposes APIs for but does not
//! implement.
#![no_std]
#![allow(dead_code)]
#![allow(unused_variables)]
#![feature(negative_impls)]
#![feature(alloc_error_handler)]
#![feature(abi_x86_interrupt)]
#![feature(const_maybe_uninit_zeroed)]
#![feature(strict_provenance)]
#![feature(let_chains)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod config;
pub mod console;
mod error;
pub mod logger;
pub mod prelude;
pub mod shutdown;
pub mod sync;
pub mod task;
pub mod test_harness;
pub mod trap;
pub mod vm;

#[cfg(test)]
mod test;

pub use self::error::Error;
pub use self::prelude::Result;

use core::{mem, panic::PanicInfo};

use log::info;

/// Brings the trap-and-task substrate up to the point where the idle task
/// exists and the scheduler could be entered: the logger, the heap, the
/// boot command line and memory map, paging, the guard-paged exception
/// stacks, the IDT, and finally the scheduler's idle task. If the command
/// line asks for the fault-injection harness, runs it last.
///
/// Must run exactly once. Assumes the architecture's entry point
/// (`arch::x86::boot`) has already registered the raw boot-protocol
/// getters with `boot::register_boot_init_callbacks`; that handshake is
/// this crate's one external dependency (§1), not this function's job.
pub fn init() {
    arch::before_all_init();
    logger::init();
    vm::heap_allocator::init();
    arch::x86::boot::init();
    if let Some(level) = boot::kernel_cmdline().log_level() {
        log::set_max_level(level);
    }
    vm::init();
    trap::init();
    arch::after_all_init();
    task::init();
    info!("init: trap-and-task substrate ready");

    let cfg = boot::kernel_cmdline().itests_config();
    if cfg.stacktrace_demo {
        info!("init: itests.stacktrace_demo requested, walking the boot stack");
        walk_stack();
    }
    test_harness::run(&cfg);
}

#[inline(always)]
pub(crate) const fn zero<T>() -> T {
    unsafe { mem::MaybeUninit::zeroed().assume_init() }
}

/// The crate's panic handler (SPEC_FULL.md §7): always terminal. Prints the
/// panic message, walks the stack via the frame-pointer chain (bounded
/// depth, stops on a cycle or a non-canonical frame pointer), quiesces and
/// drains the serial console, then halts.
///
/// This is an ordinary function rather than `#[panic_handler]` so a
/// downstream kernel binary can supply its own attribute and forward to
/// it:
///
/// ```ignore
/// #[panic_handler]
/// fn panic(info: &core::panic::PanicInfo) -> ! {
///     trapforge::panic_handler(info)
/// }
/// ```
///
/// Under the `#[test_case]` harness (`cargo test`), `test`'s own
/// `#[panic_handler]` takes over instead and reports failure via the QEMU
/// isa-debug-exit device.
pub fn panic_handler(info: &PanicInfo) -> ! {
    println!("[panic] {}", info);
    walk_stack();
    shutdown::quiesce();
    shutdown::drain_serial();
    loop {
        x86_64::instructions::hlt();
    }
}

/// Bounded, loop-detecting frame-pointer walk (§7's "walk stack via frame
/// pointer, bounded depth, loop detection"). Best-effort: a missing or
/// corrupted frame-pointer chain just truncates the trace early rather
/// than faulting again while already handling a panic.
fn walk_stack() {
    const MAX_DEPTH: usize = 32;

    let mut rbp: usize;
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp);
    }

    println!("---- stack trace ----");
    let mut seen = [0usize; MAX_DEPTH];
    for depth in 0..MAX_DEPTH {
        if rbp == 0 || rbp % mem::size_of::<usize>() != 0 {
            break;
        }
        if seen[..depth].contains(&rbp) {
            println!("  <cycle detected, stopping>");
            break;
        }
        seen[depth] = rbp;

        let return_addr = unsafe { *((rbp + 8) as *const usize) };
        if return_addr == 0 {
            break;
        }
        println!("  #{}: ra={:#x}", depth, return_addr);

        let next_rbp = unsafe { *(rbp as *const usize) };
        if next_rbp <= rbp {
            break;
        }
        rbp = next_rbp;
    }
    println!("---- end stack trace ----");
}
