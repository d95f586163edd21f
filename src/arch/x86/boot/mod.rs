//! The x86 boot module: glue for the Limine boot protocol entry point.
//!
//! This registers the architecture-independent `crate::boot` getters with
//! Limine-backed implementations. In this module we use `println!` to print
//! information rather than logging, since the logger is not initialized
//! this early.

pub mod limine;

use crate::boot::register_boot_init_callbacks;

/// Reads the Limine request responses and registers the callbacks that
/// populate `crate::boot`'s architecture-independent getters. Must run
/// after the heap is available.
pub(crate) fn init() {
    limine::init();
    register_boot_init_callbacks(
        limine::init_bootloader_name,
        limine::init_kernel_commandline,
        limine::init_memory_regions,
    );
    crate::boot::init();
}
