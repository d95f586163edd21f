//! x86_64 architecture glue: boot entry, the legacy PIC/PIT, the serial
//! console, paging support (C3) and the IDT/GDT/stack layer (C4-C6, C9).

pub mod boot;
pub mod device;
pub(crate) mod irq;
pub(crate) mod kernel;
pub(crate) mod mm;
pub mod qemu;
pub(crate) mod timer;

/// Runs before the heap, the boot-protocol parse, or anything else:
/// CPU-feature enablement and bringing the serial port up so
/// `early_println!`/the logger have somewhere to write.
pub(crate) fn before_all_init() {
    enable_common_cpu_features();
    device::serial::init();
}

/// Runs after `vm::init`/`trap::init`: the legacy PIC, its periodic PIT
/// tick, and the serial input IRQ callback.
pub(crate) fn after_all_init() {
    kernel::tsc::init();
    kernel::pic::init();
    timer::init();
    device::serial::callback_init();
}

/// Acknowledges whatever IRQ line just fired. `trap::irq`'s dispatcher
/// calls this once per IRQ, after running registered callbacks.
pub(crate) fn interrupts_ack() {
    kernel::pic::eoi_any();
}

fn enable_common_cpu_features() {
    use x86_64::registers::{control::Cr4Flags, model_specific::EferFlags, xcontrol::XCr0Flags};
    let mut cr4 = x86_64::registers::control::Cr4::read();
    cr4 |= Cr4Flags::FSGSBASE | Cr4Flags::OSXSAVE | Cr4Flags::OSFXSR | Cr4Flags::OSXMMEXCPT_ENABLE;
    unsafe {
        x86_64::registers::control::Cr4::write(cr4);
    }

    let mut xcr0 = x86_64::registers::xcontrol::XCr0::read();
    xcr0 |= XCr0Flags::AVX | XCr0Flags::SSE;
    unsafe {
        x86_64::registers::xcontrol::XCr0::write(xcr0);
    }

    unsafe {
        // enable non-executable page protection
        x86_64::registers::model_specific::Efer::update(|efer| {
            *efer |= EferFlags::NO_EXECUTE_ENABLE;
        });
    }
}
