//! GDT and TSS: kernel code/data selectors plus the IST slots C4's
//! guard-paged stacks are wired to.

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::config::NUM_EXCEPTION_STACKS;

use super::stack::{self, DOUBLE_FAULT_IST, MACHINE_CHECK_IST, NMI_IST, PAGE_FAULT_IST};

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[DOUBLE_FAULT_IST as usize] =
            VirtAddr::new(stack::stack_top(DOUBLE_FAULT_IST as usize) as u64);
        tss.interrupt_stack_table[PAGE_FAULT_IST as usize] =
            VirtAddr::new(stack::stack_top(PAGE_FAULT_IST as usize) as u64);
        tss.interrupt_stack_table[NMI_IST as usize] =
            VirtAddr::new(stack::stack_top(NMI_IST as usize) as u64);
        tss.interrupt_stack_table[MACHINE_CHECK_IST as usize] =
            VirtAddr::new(stack::stack_top(MACHINE_CHECK_IST as usize) as u64);
        tss
    };
}

struct Selectors {
    code: SegmentSelector,
    data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code = gdt.add_entry(Descriptor::kernel_code_segment());
        let data = gdt.add_entry(Descriptor::kernel_data_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(&TSS));
        (gdt, Selectors { code, data, tss })
    };
}

/// Loads the GDT, reloads the kernel segment registers, and loads the TSS.
///
/// # Safety
///
/// Must run exactly once, after `trap::stack::init` has carved every IST
/// stack `TSS` reads from, and before the IDT is loaded.
pub(crate) fn init() {
    debug_assert!(
        NUM_EXCEPTION_STACKS >= 4,
        "gdt wires four named IST slots; config.rs must provide at least that many"
    );
    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.code);
        DS::set_reg(GDT.1.data);
        SS::set_reg(GDT.1.data);
        load_tss(GDT.1.tss);
    }
}
