//! Time Source: the single authority for "what tick is it" and "how many
//! nanoseconds has the system been up", and the bridge between the PIT's
//! 1 kHz IRQ and the scheduler's sleep/wake machinery.
//!
//! Only the timer interrupt handler and the scheduler call into this module
//! with interrupts already disabled (the IRQ path) or don't care about the
//! race (reads of monotonically-increasing counters are safe to race).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::{pit, tsc};

/// Earliest sleep deadline any thread is currently waiting on, in ticks.
/// `u64::MAX` means nothing is scheduled. Purely advisory: the PIT always
/// ticks at a fixed 1 kHz regardless, so there is no hardware to rearm -
/// this only lets callers query "is anything due soon" without touching
/// the scheduler's sleep set.
static NEXT_DEADLINE: AtomicU64 = AtomicU64::new(u64::MAX);

/// Current tick count, i.e. ticks since `early_init`. Ticks are 1:1 with
/// `pit::tick()` increments; this module doesn't keep its own counter to
/// avoid two sources of truth, it just forwards `pit::ticks()`.
pub fn now() -> u64 {
    pit::ticks()
}

/// Nanoseconds since boot, derived from the calibrated TSC. Falls back to
/// the millisecond tick counter (scaled) if TSC calibration never
/// succeeded, so callers always get a monotonically increasing value.
pub fn now_ns() -> u64 {
    let freq = tsc::get_tsc_frequency();
    if freq == 0 {
        return now().saturating_mul(1_000_000);
    }
    tsc::tsc_to_ns(tsc::read_tsc())
}

/// Milliseconds since boot. The PIT runs at 1000 Hz (see
/// `arch::x86_64::boot::early_init`), so one tick is one millisecond.
pub fn uptime_ms() -> u64 {
    now()
}

/// Records the next tick at which a sleeping thread wants to be woken.
/// Called by `sched::sleep_until` after it enqueues the sleeper; used only
/// to answer `next_deadline()`, since the PIT itself doesn't need rearming.
pub fn schedule_irq_at(tick: u64) {
    NEXT_DEADLINE.fetch_min(tick, Ordering::SeqCst);
}

/// The earliest sleep deadline currently outstanding, if any.
pub fn next_deadline() -> Option<u64> {
    match NEXT_DEADLINE.load(Ordering::SeqCst) {
        u64::MAX => None,
        t => Some(t),
    }
}

/// Called from the timer interrupt handler on every PIT tick, after
/// `pit::tick()` has advanced the raw counter and before the scheduler
/// decides whether to preempt. Wakes any sleepers whose deadline has
/// arrived and refreshes `NEXT_DEADLINE` to whatever the scheduler reports
/// is now the earliest remaining one.
pub fn on_timer_tick() {
    let now = now();
    match crate::sched::wake_due_sleepers(now) {
        Some(next) => NEXT_DEADLINE.store(next, Ordering::SeqCst),
        None => NEXT_DEADLINE.store(u64::MAX, Ordering::SeqCst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_deadline_starts_empty() {
        // fetch_min only ever lowers the stored value, so a fresh
        // schedule_irq_at call always narrows toward the true minimum
        // regardless of call order.
        NEXT_DEADLINE.store(u64::MAX, Ordering::SeqCst);
        schedule_irq_at(100);
        schedule_irq_at(50);
        assert_eq!(next_deadline(), Some(50));
    }
}
