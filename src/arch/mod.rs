//! Architecture selection. Only x86_64 is supported (SPEC_FULL.md §1): the
//! crate's `default` feature set pins it, and this module just forwards to
//! `x86`'s entry points and the handful of items other layers reach into
//! directly (`arch::irq`, `arch::mm`).

pub mod x86;

pub(crate) use self::x86::irq;
pub(crate) use self::x86::mm;

pub(crate) fn before_all_init() {
    x86::before_all_init();
}

pub(crate) fn after_all_init() {
    x86::after_all_init();
}
