//! Exception taxonomy and error-code analyzers (C6, SPEC_FULL.md §4.5, §4.6).

/// CPU exception vectors, named per the Intel SDM. Vectors 15, 21-31 are
/// reserved and never raised by current hardware; they still route through
/// the dispatcher like any other vector < 32.
pub const DIVIDE_ERROR: u8 = 0;
pub const DEBUG: u8 = 1;
pub const NON_MASKABLE_INTERRUPT: u8 = 2;
pub const BREAKPOINT: u8 = 3;
pub const OVERFLOW: u8 = 4;
pub const BOUND_RANGE_EXCEEDED: u8 = 5;
pub const INVALID_OPCODE: u8 = 6;
pub const DEVICE_NOT_AVAILABLE: u8 = 7;
pub const DOUBLE_FAULT: u8 = 8;
pub const COPROCESSOR_SEGMENT_OVERRUN: u8 = 9;
pub const INVALID_TSS: u8 = 10;
pub const SEGMENT_NOT_PRESENT: u8 = 11;
pub const STACK_SEGMENT_FAULT: u8 = 12;
pub const GENERAL_PROTECTION_FAULT: u8 = 13;
pub const PAGE_FAULT: u8 = 14;
pub const X87_FLOATING_POINT: u8 = 16;
pub const ALIGNMENT_CHECK: u8 = 17;
pub const MACHINE_CHECK: u8 = 18;
pub const SIMD_FLOATING_POINT: u8 = 19;
pub const VIRTUALIZATION: u8 = 20;

/// First IRQ vector (SPEC_FULL.md §4.5: "IRQs 32-47 use the same stub").
pub const IRQ_BASE: u8 = 32;

/// Vectors that may never be routed to a TEST-mode override (§3, §4.5).
pub fn is_critical(vector: u8) -> bool {
    matches!(vector, DOUBLE_FAULT | MACHINE_CHECK | NON_MASKABLE_INTERRUPT)
}

/// Human-readable mnemonic for a named exception vector, for log lines and
/// panic messages. Vectors with no architectural name (or IRQs) get a
/// generic label.
pub fn name(vector: u8) -> &'static str {
    match vector {
        DIVIDE_ERROR => "divide-error",
        DEBUG => "debug",
        NON_MASKABLE_INTERRUPT => "nmi",
        BREAKPOINT => "breakpoint",
        OVERFLOW => "overflow",
        BOUND_RANGE_EXCEEDED => "bound-range-exceeded",
        INVALID_OPCODE => "invalid-opcode",
        DEVICE_NOT_AVAILABLE => "device-not-available",
        DOUBLE_FAULT => "double-fault",
        COPROCESSOR_SEGMENT_OVERRUN => "coprocessor-segment-overrun",
        INVALID_TSS => "invalid-tss",
        SEGMENT_NOT_PRESENT => "segment-not-present",
        STACK_SEGMENT_FAULT => "stack-segment-fault",
        GENERAL_PROTECTION_FAULT => "general-protection-fault",
        PAGE_FAULT => "page-fault",
        X87_FLOATING_POINT => "x87-floating-point",
        ALIGNMENT_CHECK => "alignment-check",
        MACHINE_CHECK => "machine-check",
        SIMD_FLOATING_POINT => "simd-floating-point",
        VIRTUALIZATION => "virtualization",
        v if v >= IRQ_BASE => "irq",
        _ => "reserved",
    }
}

/// Decoded page-fault error code (Intel SDM Vol. 3, §4.7).
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// `false` when the fault was caused by a not-present page.
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub reserved_write: bool,
    pub instruction_fetch: bool,
}

impl PageFaultInfo {
    pub fn decode(error_code: u64) -> Self {
        PageFaultInfo {
            present: error_code & 1 != 0,
            write: error_code & (1 << 1) != 0,
            user: error_code & (1 << 2) != 0,
            reserved_write: error_code & (1 << 3) != 0,
            instruction_fetch: error_code & (1 << 4) != 0,
        }
    }
}

/// Which descriptor table a selector-bearing error code points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorTable {
    Gdt,
    Idt,
    Ldt,
}

/// Decoded general-protection-fault (and similarly shaped #TS/#NP/#SS) error
/// code (Intel SDM Vol. 3, §6.13).
#[derive(Debug, Clone, Copy)]
pub struct SelectorErrorInfo {
    pub external: bool,
    pub table: SelectorTable,
    pub selector_index: u16,
}

impl SelectorErrorInfo {
    pub fn decode(error_code: u64) -> Self {
        let idt = error_code & (1 << 1) != 0;
        let ti = error_code & (1 << 2) != 0;
        let table = if idt {
            SelectorTable::Idt
        } else if ti {
            SelectorTable::Ldt
        } else {
            SelectorTable::Gdt
        };
        SelectorErrorInfo {
            external: error_code & 1 != 0,
            table,
            selector_index: ((error_code >> 3) & 0x1FFF) as u16,
        }
    }
}
