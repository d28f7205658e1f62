//! Interrupt discipline: RAII scopes that bracket the kernel's critical sections.
//!
//! Three scope kinds, all released on drop so they survive early returns and
//! unwinding panics alike:
//!
//! - [`GlobalDisable`]: masks all maskable interrupts. Nestable via an internal
//!   counter; only the outermost guard re-enables interrupts on drop.
//! - [`FastGlobalDisable`]: same effect, no counter. Lighter weight, but must
//!   not be nested inconsistently with `GlobalDisable` (the two share the
//!   hardware interrupt flag and neither knows about the other's nesting).
//! - [`KernelPause`]: does not touch the interrupt flag. Sets a flag that
//!   tells the scheduler not to switch away from the current thread.
//!   Nestable via a counter, like `GlobalDisable`.
//!
//! Every public API that may block must drop all of its `KernelPause` guards
//! before blocking; anything that reads scheduler-owned state must be holding
//! at least one of the three.

use core::sync::atomic::{AtomicUsize, Ordering};

/// The only place the raw `cli`/`sti`/`pushf` instructions appear. Everything
/// else in the kernel - including `sched`, which brackets its own scheduler
/// transitions without going through the RAII guards below - goes through
/// this module, so there is exactly one seam to swap for a host build.
///
/// Under `cfg(test)` this is backed by a plain atomic flag instead of the
/// real instructions: `cli`/`sti` require CPL0 and would fault under the
/// host test harness, which runs unprivileged. The flag preserves the same
/// nesting-observable behavior (`are_enabled` reflects the most recent
/// `disable`/`enable`) so every primitive built on top of it - the RAII
/// guards here, `sched`'s own bracketing - exercises its real logic in
/// scenario tests instead of being skipped.
pub(crate) mod irq {
    #[cfg(not(test))]
    pub fn disable() {
        x86_64::instructions::interrupts::disable();
    }

    #[cfg(not(test))]
    pub fn enable() {
        x86_64::instructions::interrupts::enable();
    }

    #[cfg(not(test))]
    pub fn are_enabled() -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    #[cfg(test)]
    mod host {
        use core::sync::atomic::{AtomicBool, Ordering};
        static ENABLED: AtomicBool = AtomicBool::new(true);

        pub fn disable() {
            ENABLED.store(false, Ordering::SeqCst);
        }

        pub fn enable() {
            ENABLED.store(true, Ordering::SeqCst);
        }

        pub fn are_enabled() -> bool {
            ENABLED.load(Ordering::SeqCst)
        }
    }

    #[cfg(test)]
    pub use host::{are_enabled, disable, enable};
}

static DISABLE_DEPTH: AtomicUsize = AtomicUsize::new(0);
static PAUSE_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// True while any `GlobalDisable`/`FastGlobalDisable` guard is outstanding.
pub fn interrupts_disabled() -> bool {
    DISABLE_DEPTH.load(Ordering::Relaxed) > 0 || !irq::are_enabled()
}

/// True while any `KernelPause` guard is outstanding.
pub fn scheduler_paused() -> bool {
    PAUSE_DEPTH.load(Ordering::Relaxed) > 0
}

/// Nestable global interrupt mask. The outermost instance re-enables
/// interrupts on drop; inner instances only decrement the counter.
pub struct GlobalDisable {
    _private: (),
}

impl GlobalDisable {
    pub fn new() -> Self {
        irq::disable();
        DISABLE_DEPTH.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }
}

impl Default for GlobalDisable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GlobalDisable {
    fn drop(&mut self) {
        if DISABLE_DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
            irq::enable();
        }
    }
}

/// Un-nestable global interrupt mask. Cheaper than `GlobalDisable` (no
/// counter maintenance) but callers are responsible for never creating one
/// while a `GlobalDisable` guard from the same thread is still outstanding,
/// and vice versa - mixing the two breaks the implicit nesting invariant.
pub struct FastGlobalDisable {
    was_enabled: bool,
}

impl FastGlobalDisable {
    pub fn new() -> Self {
        let was_enabled = irq::are_enabled();
        irq::disable();
        Self { was_enabled }
    }
}

impl Default for FastGlobalDisable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FastGlobalDisable {
    fn drop(&mut self) {
        if self.was_enabled {
            irq::enable();
        }
    }
}

/// Prevents the scheduler from switching away from the current thread
/// without masking interrupts. Nestable; releases on the outermost drop.
pub struct KernelPause {
    _private: (),
}

impl KernelPause {
    pub fn new() -> Self {
        PAUSE_DEPTH.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }
}

impl Default for KernelPause {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KernelPause {
    fn drop(&mut self) {
        PAUSE_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Temporarily re-enables interrupts within an outer `GlobalDisable` scope,
/// restoring the disabled state on drop. Used by code that must block (and
/// therefore must not hold interrupts disabled) while logically still inside
/// a broader critical section.
pub struct EnableWithinDisable {
    _private: (),
}

impl EnableWithinDisable {
    pub fn new() -> Self {
        irq::enable();
        Self { _private: () }
    }
}

impl Default for EnableWithinDisable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EnableWithinDisable {
    fn drop(&mut self) {
        irq::disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_global_disable_releases_once_outermost_drops() {
        assert_eq!(DISABLE_DEPTH.load(Ordering::Relaxed), 0);
        {
            let _outer = GlobalDisable::new();
            assert_eq!(DISABLE_DEPTH.load(Ordering::Relaxed), 1);
            {
                let _inner = GlobalDisable::new();
                assert_eq!(DISABLE_DEPTH.load(Ordering::Relaxed), 2);
            }
            assert_eq!(DISABLE_DEPTH.load(Ordering::Relaxed), 1);
        }
        assert_eq!(DISABLE_DEPTH.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn kernel_pause_tracks_depth() {
        assert!(!scheduler_paused());
        let a = KernelPause::new();
        assert!(scheduler_paused());
        let b = KernelPause::new();
        drop(a);
        assert!(scheduler_paused());
        drop(b);
        assert!(!scheduler_paused());
    }
}
