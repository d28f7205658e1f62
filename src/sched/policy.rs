//! The comparator the rest of the scheduler is generic over. Swapping the
//! `ActivePolicy` alias is the only thing `--features sched-edf` changes.

/// Orders candidate threads by their raw priority word. Under fixed-priority
/// scheduling that word is a priority (bigger wins); under EDF it is
/// interpreted as a deadline (smaller wins). Everything else in the
/// scheduler - the ready set, wake/preempt, wait-queue ordering - calls
/// through this single comparator and never compares priority words itself.
pub trait SchedPolicy {
    /// Returns `true` if a thread with priority word `a` should run ahead of
    /// one with priority word `b`.
    fn better(a: i32, b: i32) -> bool;
}

/// Fixed-priority scheduling: the highest numeric priority among Ready is
/// Running; threads at the same level round-robin.
pub struct FixedPriorityRR;

impl SchedPolicy for FixedPriorityRR {
    #[inline]
    fn better(a: i32, b: i32) -> bool {
        a > b
    }
}

/// Earliest-deadline-first: the priority word is a deadline tick; the
/// smallest deadline runs next.
pub struct Edf;

impl SchedPolicy for Edf {
    #[inline]
    fn better(a: i32, b: i32) -> bool {
        a < b
    }
}

#[cfg(feature = "sched-edf")]
pub type ActivePolicy = Edf;
#[cfg(not(feature = "sched-edf"))]
pub type ActivePolicy = FixedPriorityRR;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_priority_prefers_larger() {
        assert!(FixedPriorityRR::better(5, 3));
        assert!(!FixedPriorityRR::better(3, 5));
    }

    #[test]
    fn edf_prefers_smaller_deadline() {
        assert!(Edf::better(3, 5));
        assert!(!Edf::better(5, 3));
    }
}
