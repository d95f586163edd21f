//! Glue between the Limine boot protocol and the architecture-independent
//! `crate::boot` module.
//!
//! Requests are `static`s placed in the `.requests` section so the
//! bootloader can find them before the kernel's Rust entry point runs; the
//! heap is not yet available at that point, so responses are only read once
//! `init` is invoked from `crate::arch::before_all_init`, after which the
//! architecture-independent getters in `crate::boot` become usable.

use alloc::{string::String, vec::Vec};
use limine::{
    LimineBootInfoRequest, LimineHhdmRequest, LimineKernelFileRequest, LimineMemmapEntry,
    LimineMemmapRequest, LimineMemoryMapEntryType, LimineStackSizeRequest,
};
use log::info;
use spin::Once;

use crate::boot::kcmdline::KCmdlineArg;
use crate::boot::memory_region::{MemoryRegion, MemoryRegionType};
use crate::config::{self, PAGE_SIZE};

static BOOTLOADER_INFO_REQUEST: LimineBootInfoRequest = LimineBootInfoRequest::new(0);
static HHDM_REQUEST: LimineHhdmRequest = LimineHhdmRequest::new(0);
static KERNEL_FILE_REQUEST: LimineKernelFileRequest = LimineKernelFileRequest::new(0);
static MEMMAP_REQUEST: LimineMemmapRequest = LimineMemmapRequest::new(0);
static STACK_REQUEST: LimineStackSizeRequest = {
    let a = LimineStackSizeRequest::new(0);
    // 64 * 4096(PAGE_SIZE)
    a.stack_size(64 * PAGE_SIZE as u64)
};

/// Validates the bootloader-provided HHDM offset and ensures the stack-size
/// request was honored. Must run before any of the `init_*` callbacks below.
pub fn init() {
    if let Some(bootinfo) = BOOTLOADER_INFO_REQUEST.get_response().get() {
        info!(
            "booted by {} v{}",
            bootinfo.name.to_str().unwrap().to_str().unwrap(),
            bootinfo.version.to_str().unwrap().to_str().unwrap(),
        );
    }
    let response = HHDM_REQUEST
        .get_response()
        .get()
        .expect("Not found HHDM Features");
    assert_eq!(config::PHYS_OFFSET as u64, response.offset);
    STACK_REQUEST.get_response().get().unwrap();
}

pub(crate) fn init_bootloader_name(bootloader_name: &'static Once<String>) {
    let name = BOOTLOADER_INFO_REQUEST
        .get_response()
        .get()
        .and_then(|info| info.name.to_str())
        .and_then(|s| s.to_str().ok())
        .unwrap_or("unknown");
    bootloader_name.call_once(|| String::from(name));
}

pub(crate) fn init_kernel_commandline(kernel_cmdline: &'static Once<KCmdlineArg>) {
    let raw = KERNEL_FILE_REQUEST
        .get_response()
        .get()
        .and_then(|r| r.kernel_file.get())
        .and_then(|file| file.cmdline.to_str())
        .and_then(|s| s.to_str().ok())
        .unwrap_or("");
    kernel_cmdline.call_once(|| KCmdlineArg::from(raw));
}

pub(crate) fn init_memory_regions(memory_regions: &'static Once<Vec<MemoryRegion>>) {
    let response = MEMMAP_REQUEST
        .get_response()
        .get()
        .expect("Limine did not answer the memory map request");
    let regions = response
        .memmap()
        .iter()
        .map(|e| memory_region_from_limine(e))
        .collect();
    memory_regions.call_once(|| regions);
}

fn memory_region_from_limine(entry: &LimineMemmapEntry) -> MemoryRegion {
    let typ = match entry.typ {
        LimineMemoryMapEntryType::Usable => MemoryRegionType::Usable,
        LimineMemoryMapEntryType::Reserved => MemoryRegionType::Reserved,
        LimineMemoryMapEntryType::AcpiReclaimable => MemoryRegionType::Reclaimable,
        LimineMemoryMapEntryType::AcpiNvs => MemoryRegionType::NonVolatileSleep,
        LimineMemoryMapEntryType::BadMemory => MemoryRegionType::BadMemory,
        LimineMemoryMapEntryType::BootloaderReclaimable => MemoryRegionType::Reclaimable,
        LimineMemoryMapEntryType::KernelAndModules => MemoryRegionType::Kernel,
        LimineMemoryMapEntryType::Framebuffer => MemoryRegionType::Framebuffer,
    };
    MemoryRegion::new(entry.base as usize, entry.len as usize, typ)
}
