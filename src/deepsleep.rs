//! Deep-Sleep Coordinator (DS): the idle thread's hook for trading a plain
//! wait-for-interrupt for a real low-power stop when the next scheduled
//! wakeup is far enough away to be worth it.
//!
//! Targets the HPET one-shot channel (`arch::x86_64::hpet`) when bring-up
//! succeeded; reports `NotSupported` otherwise so the idle thread always has
//! a correct fallback. Either path preserves the monotonic tick exactly -
//! deep-sleep differs only in power draw, never in what time the scheduler
//! thinks it is afterward.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86_64::{hpet, pit};

/// Ticks of lead time below which entering/leaving low-power mode costs more
/// than it saves. Below this, the idle thread just halts until the next
/// periodic tick.
const THRESHOLD_TICKS: u64 = 2;

/// Set by the HPET comparator ISR, cleared once the idle thread observes it
/// and resyncs the tick counter.
static WAKEUP_PENDING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepSleepOutcome {
    /// Entered and left low-power stop; the monotonic tick was resynced.
    Entered,
    /// Lead time was below `THRESHOLD_TICKS`; used a plain WFI instead.
    TooSoon,
    /// No working low-power path (HPET never came up). Used a plain WFI.
    NotSupported,
}

/// Called by the idle thread whenever the ready set is empty. `next_tick` is
/// the earliest tick any sleeper is waiting for, if any; with nothing
/// sleeping either, this just halts until some other IRQ arrives.
pub fn idle_hook(next_tick: Option<u64>) -> DeepSleepOutcome {
    let now = pit::ticks();
    let lead = match next_tick {
        Some(t) if t > now => t - now,
        _ => {
            wfi();
            return DeepSleepOutcome::TooSoon;
        }
    };

    if lead < THRESHOLD_TICKS {
        wfi();
        return DeepSleepOutcome::TooSoon;
    }

    let Some(hp) = hpet::get() else {
        wfi();
        return DeepSleepOutcome::NotSupported;
    };
    let delta_ns = hp.ticks_to_ns(hp.ns_to_ticks(1_000_000) * lead); // lead ticks at 1 ms/tick

    WAKEUP_PENDING.store(false, Ordering::SeqCst);
    if !hpet::arm_wakeup(delta_ns) {
        wfi();
        return DeepSleepOutcome::NotSupported;
    }

    let before = hp.read_counter();
    while !WAKEUP_PENDING.load(Ordering::SeqCst) {
        crate::arch::x86_64::halt();
    }
    let after = hp.read_counter();
    resync_tick(hp, before, after);

    DeepSleepOutcome::Entered
}

/// Folds the HPET-measured elapsed time back into the PIT tick counter so
/// sleepers see no time lost while the CPU was stopped, then advances past
/// whatever ticks would otherwise have arrived while parked.
fn resync_tick(hp: &hpet::Hpet, before: u64, after: u64) {
    let elapsed_ns = hp.ticks_to_ns(after.wrapping_sub(before));
    let elapsed_ticks = elapsed_ns / 1_000_000;
    if elapsed_ticks > 0 {
        pit::advance_ticks(elapsed_ticks);
    }
}

fn wfi() {
    crate::arch::x86_64::halt();
}

/// Called from the HPET comparator interrupt handler (IRQ9 / vector 41).
pub fn on_wakeup_irq() {
    hpet::disarm_wakeup();
    WAKEUP_PENDING.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_nonzero() {
        assert!(THRESHOLD_TICKS > 0);
    }
}
