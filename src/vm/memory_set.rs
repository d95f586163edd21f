//! Per-task address spaces (C3) and their virtual memory areas (C11).
//!
//! An `AddressSpace` owns a root page table and a sorted list of the user
//! half's VMAs. The kernel half is never represented as a VMA: every address
//! space inherits it at creation by copying the canonical top-level entries
//! snapshotted in `crate::arch::mm::ALL_MAPPED_PTE`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::{
    arch::mm::{PageTableEntry, PageTableFlags},
    config::PAGE_SIZE,
    prelude::*,
    sync::SpinLock,
    vm::{
        is_page_aligned,
        page_table::{AddressWidth, PageTable, PageTableConfig, PageTableFlagsTrait},
        Vaddr, VmAllocOptions, VmFrame,
    },
};

bitflags::bitflags! {
    /// Permission/ownership flags carried by a VMA (§3 "Virtual memory area").
    pub struct VmaFlags: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
        const USER  = 1 << 3;
    }
}

impl VmaFlags {
    fn to_page_table_flags(self) -> PageTableFlags {
        PageTableFlags::new()
            .set_present(true)
            .set_writable(self.contains(VmaFlags::WRITE))
            .set_executable(self.contains(VmaFlags::EXEC))
            .set_accessible_by_user(self.contains(VmaFlags::USER))
    }
}

/// A `[start, end)` region of the user half of an address space, plus the
/// frames currently backing it. VMAs never overlap within an address space
/// (§3 invariant).
pub struct Vma {
    start: Vaddr,
    end: Vaddr,
    flags: VmaFlags,
    frames: BTreeMap<Vaddr, VmFrame>,
}

impl Vma {
    pub fn start(&self) -> Vaddr {
        self.start
    }

    pub fn end(&self) -> Vaddr {
        self.end
    }

    pub fn flags(&self) -> VmaFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, start: Vaddr, end: Vaddr) -> bool {
        start < self.end && self.start < end
    }
}

/// A root page table plus the user-half VMAs linked into it, and the id of
/// the process that owns it (`None` for kernel-mode tasks). Reference
/// counting is provided by wrapping this type in `Arc` at the call site
/// instead of a manual counter, matching how the rest of the crate shares
/// ownership.
pub struct AddressSpace {
    pt: SpinLock<PageTable<PageTableEntry>>,
    /// Sorted by `start`; `find_vma`/`add_vma` binary-search this vector.
    vmas: SpinLock<Vec<Vma>>,
    owner_pid: Option<u64>,
}

impl AddressSpace {
    /// Creates a fresh address space. The user half is empty; the kernel
    /// half is inherited by copying the canonical top-level entries (§4.3).
    pub fn new(owner_pid: Option<u64>) -> Arc<Self> {
        let mut pt = PageTable::<PageTableEntry>::new(PageTableConfig {
            address_width: AddressWidth::Level4PageTable,
        });
        let mapped_pte = crate::arch::mm::ALL_MAPPED_PTE.lock();
        for (index, pte) in mapped_pte.iter() {
            // Safety: these PTEs were snapshotted from the initial, valid
            // kernel page table during `vm::page_table::init`.
            unsafe {
                pt.add_root_mapping(*index, pte);
            }
        }
        Arc::new(Self {
            pt: SpinLock::new(pt),
            vmas: SpinLock::new(Vec::new()),
            owner_pid,
        })
    }

    pub fn owner_pid(&self) -> Option<u64> {
        self.owner_pid
    }

    pub fn root_paddr(&self) -> Paddr {
        self.pt.lock().root_paddr()
    }

    /// Writes CR3. Idempotent: switching to the same address space twice has
    /// no additional effect (§4.3 invariant i).
    pub fn activate(&self) {
        unsafe {
            crate::arch::mm::activate_page_table(
                self.root_paddr(),
                x86_64::registers::control::Cr3Flags::empty(),
            );
        }
    }

    /// Inserts a new VMA covering `[start, start+len)`. Fails with
    /// `Error::AlreadyMapped` if it overlaps an existing VMA.
    pub fn add_vma(&self, start: Vaddr, len: usize, flags: VmaFlags) -> Result<()> {
        debug_assert!(is_page_aligned(start) && is_page_aligned(len));
        let end = start + len;
        let mut vmas = self.vmas.lock();
        let idx = vmas.partition_point(|v| v.start < start);
        if idx > 0 && vmas[idx - 1].overlaps(start, end) {
            return Err(Error::AlreadyMapped);
        }
        if idx < vmas.len() && vmas[idx].overlaps(start, end) {
            return Err(Error::AlreadyMapped);
        }
        vmas.insert(
            idx,
            Vma {
                start,
                end,
                flags,
                frames: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Eagerly maps every page of the VMA starting at `start` to freshly
    /// allocated frames.
    pub fn populate_vma(&self, start: Vaddr) -> Result<()> {
        let mut vmas = self.vmas.lock();
        let idx = vmas
            .binary_search_by_key(&start, |v| v.start)
            .map_err(|_| Error::NotFound)?;
        let (vma_start, vma_end, flags) = {
            let vma = &vmas[idx];
            (vma.start, vma.end, vma.flags)
        };
        let pt_flags = flags.to_page_table_flags();
        let mut pt = self.pt.lock();
        let mut va = vma_start;
        while va < vma_end {
            let frame = VmAllocOptions::new(1).alloc_single()?;
            pt.map(va, frame.start_paddr(), pt_flags)
                .map_err(|_| Error::AlreadyMapped)?;
            vmas[idx].frames.insert(va, frame);
            va += PAGE_SIZE;
        }
        Ok(())
    }

    /// Removes the VMA starting at `start`, unmapping and freeing every
    /// frame that backed it.
    pub fn remove_vma(&self, start: Vaddr) -> Result<()> {
        let mut vmas = self.vmas.lock();
        let idx = vmas
            .binary_search_by_key(&start, |v| v.start)
            .map_err(|_| Error::NotFound)?;
        let vma = vmas.remove(idx);
        let mut pt = self.pt.lock();
        for va in vma.frames.keys() {
            let _ = pt.unmap(*va);
        }
        // Frames are returned to C1 when `vma.frames` is dropped here: each
        // `VmFrame`'s `Drop` deallocates once its last handle goes away.
        Ok(())
    }

    /// O(log n) lookup of the VMA containing `addr`, if any.
    pub fn find_vma(&self, addr: Vaddr) -> Option<(Vaddr, Vaddr, VmaFlags)> {
        let vmas = self.vmas.lock();
        let idx = vmas.partition_point(|v| v.start <= addr);
        if idx == 0 {
            return None;
        }
        let vma = &vmas[idx - 1];
        if addr < vma.end {
            Some((vma.start, vma.end, vma.flags))
        } else {
            None
        }
    }

    pub fn map_page(&self, vaddr: Vaddr, paddr: Paddr, flags: VmaFlags) -> Result<()> {
        self.pt
            .lock()
            .map(vaddr, paddr, flags.to_page_table_flags())
            .map_err(|_| Error::AlreadyMapped)
    }

    pub fn unmap_page(&self, vaddr: Vaddr) -> Result<()> {
        self.pt
            .lock()
            .unmap(vaddr)
            .map_err(|_| Error::InvalidArgs)
    }

    pub fn protect_page(&self, vaddr: Vaddr, flags: VmaFlags) -> Result<()> {
        self.pt
            .lock()
            .protect(vaddr, flags.to_page_table_flags())
            .map_err(|_| Error::InvalidArgs)
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root_paddr", &self.root_paddr())
            .field("owner_pid", &self.owner_pid)
            .field("vma_count", &self.vmas.lock().len())
            .finish()
    }
}
