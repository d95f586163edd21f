//! Information of memory regions in the boot phase.

use align_ext::AlignExt;
use alloc::{vec, vec::Vec};

use crate::config::PAGE_SIZE;

/// The type of initial memory regions that are needed for the kernel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum MemoryRegionType {
    /// Maybe points to an unplugged DIMM module. It's bad anyway.
    BadMemory = 0,
    /// In ACPI spec, this area needs to be preserved when sleeping.
    NonVolatileSleep = 1,
    /// Reserved by BIOS or bootloader, do not use.
    Reserved = 2,
    /// The place where kernel sections are loaded.
    Kernel = 3,
    /// The place where kernel modules (e.g. initrd) are loaded, could be reused.
    Module = 4,
    /// The memory region provided as the framebuffer.
    Framebuffer = 5,
    /// Once used in the boot phase. Kernel can reclaim it after initialization.
    Reclaimable = 6,
    /// Directly usable by the frame allocator.
    Usable = 7,
}

/// The information of initial memory regions that are needed by the kernel.
/// The sections are **not** guaranteed to not overlap. The region must be page aligned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct MemoryRegion {
    base: usize,
    len: usize,
    typ: MemoryRegionType,
}

impl MemoryRegion {
    /// Construct a page aligned memory region.
    pub fn new(base: usize, len: usize, typ: MemoryRegionType) -> Self {
        let aligned_base;
        let aligned_end;
        match typ {
            MemoryRegionType::Usable | MemoryRegionType::Reclaimable => {
                // Align shrunk. These regions may be used by the frame allocator.
                aligned_base = base.align_up(PAGE_SIZE);
                aligned_end = (base + len).align_down(PAGE_SIZE);
            }
            _ => {
                // Other regions are just markers of untouchable memory areas,
                // so align them in a bloated manner instead.
                aligned_base = base.align_down(PAGE_SIZE);
                aligned_end = (base + len).align_up(PAGE_SIZE);
            }
        }
        MemoryRegion {
            base: aligned_base,
            len: aligned_end - aligned_base,
            typ,
        }
    }

    /// The physical address of the base of the region.
    pub fn base(&self) -> usize {
        self.base
    }

    /// The length in bytes of the region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// The type of the region.
    pub fn typ(&self) -> MemoryRegionType {
        self.typ
    }

    /// Remove range `t` from `self`, resulting in 0, 1 or 2 truncated ranges.
    /// Needed since memory regions handed to us by the bootloader can overlap.
    pub fn truncate(&self, t: MemoryRegion) -> Vec<MemoryRegion> {
        if self.base < t.base {
            if self.base + self.len > t.base {
                if self.base + self.len > t.base + t.len {
                    vec![
                        MemoryRegion {
                            base: self.base,
                            len: t.base - self.base,
                            typ: self.typ,
                        },
                        MemoryRegion {
                            base: t.base + t.len,
                            len: self.base + self.len - (t.base + t.len),
                            typ: self.typ,
                        },
                    ]
                } else {
                    vec![MemoryRegion {
                        base: self.base,
                        len: t.base - self.base,
                        typ: self.typ,
                    }]
                }
            } else {
                vec![*self]
            }
        } else if self.base < t.base + t.len {
            if self.base + self.len > t.base + t.len {
                vec![MemoryRegion {
                    base: t.base + t.len,
                    len: self.base + self.len - (t.base + t.len),
                    typ: self.typ,
                }]
            } else {
                vec![]
            }
        } else {
            vec![*self]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn truncate_splits_overlap_in_the_middle() {
        let region = MemoryRegion::new(0, 0x4000, MemoryRegionType::Usable);
        let hole = MemoryRegion::new(0x1000, 0x1000, MemoryRegionType::Reserved);
        let pieces = region.truncate(hole);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].base(), 0);
        assert_eq!(pieces[0].len(), 0x1000);
        assert_eq!(pieces[1].base(), 0x2000);
        assert_eq!(pieces[1].len(), 0x2000);
    }

    #[test_case]
    fn truncate_no_overlap_keeps_region() {
        let region = MemoryRegion::new(0, 0x1000, MemoryRegionType::Usable);
        let hole = MemoryRegion::new(0x2000, 0x1000, MemoryRegionType::Reserved);
        let pieces = region.truncate(hole);
        assert_eq!(pieces, vec![region]);
    }
}
