//! Raw local-interrupt primitives (`cli`/`sti`/`pushfq`), the foundation
//! `trap::irq::disable_local` builds its nesting guard on.

use x86_64::instructions::interrupts;

/// Whether interrupts are currently enabled on this core (RFLAGS.IF).
pub(crate) fn is_local_enabled() -> bool {
    interrupts::are_enabled()
}

/// Clears RFLAGS.IF. Does not track nesting; callers needing that use
/// `trap::irq::disable_local`'s guard instead of calling this directly.
pub(crate) fn disable_local() {
    interrupts::disable();
}

/// Sets RFLAGS.IF.
pub(crate) fn enable_local() {
    interrupts::enable();
}
