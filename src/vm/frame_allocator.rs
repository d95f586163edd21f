use align_ext::AlignExt;
use alloc::vec::Vec;
use buddy_system_allocator::FrameAllocator;
use log::{info, trace, warn};
use spin::Once;

use crate::boot::memory_region::{MemoryRegion, MemoryRegionType};
use crate::{config::PAGE_SIZE, sync::SpinLock};

use super::reservation::{Reservation, ReservationFlags, ReservationSet, ReservationTag};
use super::{frame::VmFrameFlags, VmFrame};

pub(super) static FRAME_ALLOCATOR: Once<SpinLock<FrameAllocator>> = Once::new();

/// Running totals tracked alongside the bitmap allocator (C1 §4.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameAllocatorStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub allocated_frames: usize,
}

static STATS: SpinLock<FrameAllocatorStats> = SpinLock::new(FrameAllocatorStats {
    total_frames: 0,
    free_frames: 0,
    allocated_frames: 0,
});

pub fn stats() -> FrameAllocatorStats {
    *STATS.lock()
}

pub(crate) fn alloc(flags: VmFrameFlags) -> Option<VmFrame> {
    let frame = FRAME_ALLOCATOR.get().unwrap().lock().alloc(1).map(|pa| {
        let mut stats = STATS.lock();
        stats.free_frames -= 1;
        stats.allocated_frames += 1;
        unsafe { VmFrame::new(pa * PAGE_SIZE, flags.union(VmFrameFlags::NEED_DEALLOC)) }
    });
    if frame.is_none() {
        warn!("frame allocator: out of frames");
    }
    frame
}

pub(crate) fn alloc_continuous(frame_count: usize, flags: VmFrameFlags) -> Option<Vec<VmFrame>> {
    let frames = FRAME_ALLOCATOR
        .get()
        .unwrap()
        .lock()
        .alloc(frame_count)
        .map(|start| {
            let mut stats = STATS.lock();
            stats.free_frames -= frame_count;
            stats.allocated_frames += frame_count;
            drop(stats);
            let mut vector = Vec::with_capacity(frame_count);
            unsafe {
                for i in 0..frame_count {
                    let frame = VmFrame::new(
                        (start + i) * PAGE_SIZE,
                        flags.union(VmFrameFlags::NEED_DEALLOC),
                    );
                    vector.push(frame);
                }
            }
            vector
        });
    if frames.is_none() {
        warn!("frame allocator: out of frames for {} frame request", frame_count);
    }
    frames
}

pub(crate) fn alloc_zero(flags: VmFrameFlags) -> Option<VmFrame> {
    let frame = alloc(flags)?;
    frame.zero();
    Some(frame)
}

/// Dealloc a frame.
///
/// # Safety
///
/// User should ensure the index is valid
///
pub(crate) unsafe fn dealloc(index: usize) {
    FRAME_ALLOCATOR.get().unwrap().lock().dealloc(index, 1);
    let mut stats = STATS.lock();
    stats.free_frames += 1;
    stats.allocated_frames -= 1;
    trace!("frame allocator: freed frame {:#x}", index * PAGE_SIZE);
}

/// Builds the reservation set for the regions the allocator must never hand
/// out, then seeds the bitmap allocator with everything usable minus those
/// reservations.
pub(crate) fn init(regions: &[MemoryRegion]) {
    let mut reservations = ReservationSet::new();
    for region in regions.iter() {
        let tag = match region.typ() {
            MemoryRegionType::Framebuffer => Some(ReservationTag::Framebuffer),
            MemoryRegionType::Reclaimable => Some(ReservationTag::AcpiReclaim),
            MemoryRegionType::NonVolatileSleep => Some(ReservationTag::AcpiNvs),
            MemoryRegionType::Reserved | MemoryRegionType::BadMemory => {
                Some(ReservationTag::FirmwareOther)
            }
            _ => None,
        };
        if let Some(tag) = tag {
            reservations.insert(Reservation::new(
                region.base(),
                region.len(),
                tag,
                ReservationFlags::EXCLUDE_FROM_ALLOCATOR,
            ));
        }
    }
    debug_assert!(reservations.check_no_overlaps());

    let mut allocator = FrameAllocator::<32>::new();
    let mut total = 0usize;
    for region in regions.iter() {
        if region.typ() != MemoryRegionType::Usable {
            continue;
        }
        // Make the memory region page-aligned
        let base = region.base().align_up(PAGE_SIZE);
        let end = (region.base() + region.len()).align_down(PAGE_SIZE);
        if end <= base {
            continue;
        }
        let mut cursor = base;
        while cursor < end {
            let chunk_end = next_reservation_boundary(&reservations, cursor, end);
            if !reservations.excludes(cursor, PAGE_SIZE) {
                let start = cursor / PAGE_SIZE;
                let stop = chunk_end / PAGE_SIZE;
                allocator.add_frame(start, stop);
                total += stop - start;
            }
            cursor = chunk_end;
        }
        info!(
            "frame allocator: usable region {:#x}..{:#x}",
            region.base(),
            region.base() + region.len()
        );
    }

    *STATS.lock() = FrameAllocatorStats {
        total_frames: total,
        free_frames: total,
        allocated_frames: 0,
    };

    FRAME_ALLOCATOR.call_once(|| SpinLock::new(allocator));
    RESERVATIONS.call_once(|| SpinLock::new(reservations));
}

pub(crate) static RESERVATIONS: Once<SpinLock<ReservationSet>> = Once::new();

/// Walks forward one page at a time to find the next point at which the
/// exclusion verdict for `[cursor, cursor+PAGE_SIZE)` could change, bounded
/// by `end`. A linear scan is adequate: reservations are few and boot-time
/// only.
fn next_reservation_boundary(reservations: &ReservationSet, cursor: usize, end: usize) -> usize {
    let excluded_now = reservations.excludes(cursor, PAGE_SIZE);
    let mut probe = cursor + PAGE_SIZE;
    while probe < end && reservations.excludes(probe, PAGE_SIZE) == excluded_now {
        probe += PAGE_SIZE;
    }
    probe.min(end)
}
