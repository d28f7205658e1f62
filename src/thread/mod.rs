//! Thread Creation, Join, Detach, Termination (§4.12): the public surface
//! external collaborators (drivers, the Logger demonstrator) actually call.
//! Everything here is a thin wrapper over `crate::sched`, which owns the
//! TCB table and ready/sleep sets.

pub mod tcb;

pub use tcb::{DetachState, ThreadId, ThreadState, WaitReason};

use crate::sched::{self, SchedPolicy};
use crate::sync::critical::GlobalDisable;

pub use sched::JoinError;

/// Default stack size for threads that don't ask for a specific one.
pub const DEFAULT_STACK_SIZE: usize = sched::DEFAULT_STACK_SIZE;

/// Creates a new thread running `entry(arg)` and inserts it into the ready
/// set. The entry function's return value becomes the result a later `join`
/// observes.
pub fn create(
    entry: extern "C" fn(usize) -> usize,
    arg: usize,
    stack_size: usize,
    priority: i32,
    detach: DetachState,
) -> ThreadId {
    sched::spawn(entry, arg, stack_size, priority, detach)
}

pub fn current() -> ThreadId {
    sched::current()
}

/// Voluntary reschedule; the caller remains Ready.
pub fn yield_now() {
    sched::yield_now();
}

/// Parks the caller until `tick_freq`-scaled absolute tick `tick`. Waking
/// before `tick` never happens; `sleep_until` in the past still costs
/// exactly one reschedule.
pub fn sleep_until(tick: u64) {
    sched::sleep_until(tick);
}

/// `sleep(duration) == sleep_until(now() + duration)`.
pub fn sleep(ticks: u64) {
    sched::sleep_until(crate::time_source::now().saturating_add(ticks));
}

/// True once someone has called `request_terminate` on the calling thread.
/// Blocking primitives and long-running worker loops check this at their
/// natural wake points; nothing forcibly unwinds a running thread.
pub fn test_terminate() -> bool {
    sched::test_terminate()
}

/// Cooperative termination request. Takes effect the next time the target
/// thread calls `test_terminate`.
pub fn request_terminate(id: ThreadId) {
    sched::request_terminate(id);
}

/// Blocks until `id` terminates and reclaims its TCB/stack, returning the
/// result word its entry function returned. Fails if `id` is the caller,
/// detached, or already joined.
pub fn join(id: ThreadId) -> Result<usize, JoinError> {
    sched::join(id)
}

/// Releases a joinable thread's resources automatically on termination
/// instead of waiting for `join`. Safe to call before or after the thread
/// has actually terminated.
pub fn detach(id: ThreadId) {
    sched::detach(id);
}

pub fn set_priority(id: ThreadId, priority: i32) {
    let _g = GlobalDisable::new();
    sched::set_base_priority(id, priority);
    // Raising base priority above any currently-inherited level also raises
    // the effective one; lowering it never undoes an active inheritance -
    // that still only unwinds on the owned mutex's `unlock`. Compared
    // through the same policy-aware comparator `sched/mod.rs` uses
    // everywhere else, since under EDF "higher" means numerically smaller.
    if sched::ActivePolicy::better(priority, sched::effective_priority(id)) {
        sched::set_effective_priority(id, priority);
    }
}

pub fn get_priority(id: ThreadId) -> i32 {
    sched::base_priority(id)
}

/// Entry point synthesized by `context::build_initial_context`'s trampoline.
/// Enables interrupts, runs the thread's real entry function, then
/// terminates it - matching the spec's "thread launcher" contract.
pub fn launch(entry: extern "C" fn(usize) -> usize, arg: usize) -> ! {
    crate::sync::critical::irq::enable();
    let result = entry(arg);
    sched::terminate_current(result);
}
