//! Ready Set & Scheduler (SCH): thread creation, the ready/sleep
//! collections, and the preempt/yield/wake/sleep_until operations that move
//! threads between them.
//!
//! Scheduler state is touched only with interrupts disabled - never through
//! a spinlock held across a context switch. A spinlock acquired before
//! [`context::Platform::switch_to`] would still be "held" when some other
//! thread resumes on a completely different stack, and nothing would ever
//! unlock it. Raw `cli`/`sti` bracketing each transition, paired with
//! per-thread `rflags` in the saved context (see `context.rs`), gives the
//! same mutual exclusion on a uniprocessor without that hazard. Primitives
//! built on top of this module (mutex, condvar, fifo) must drop their own
//! [`crate::sync::critical::GlobalDisable`] guard *before* calling into
//! `wake`/`block_current_and_switch`, for the same reason.

pub mod policy;

use alloc::boxed::Box;
use alloc::collections::{BinaryHeap, VecDeque};
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::sync::atomic::{AtomicBool, Ordering};
use crate::sync::critical::irq;

pub use policy::{ActivePolicy, Edf, FixedPriorityRR, SchedPolicy};

use crate::context::{Context, Platform, X86_64};
use crate::thread::tcb::{DetachState, Tcb, ThreadId, ThreadState, WaitReason};

pub const DEFAULT_STACK_SIZE: usize = 32 * 1024;

struct Inner {
    threads: Vec<Option<Box<Tcb>>>,
    ready: VecDeque<ThreadId>,
    sleeping: BinaryHeap<Reverse<(u64, ThreadId)>>,
    current: ThreadId,
    idle: ThreadId,
}

impl Inner {
    fn slot(&mut self, id: ThreadId) -> &mut Tcb {
        self.threads[id.0].as_mut().expect("dead ThreadId")
    }

    fn prio_of(&self, id: ThreadId) -> i32 {
        self.threads[id.0].as_ref().unwrap().effective_priority()
    }

    fn pick_ready(&mut self) -> Option<ThreadId> {
        if self.ready.is_empty() {
            return None;
        }
        let mut best_idx = 0;
        let mut best_prio = self.threads[self.ready[0].0]
            .as_ref()
            .unwrap()
            .effective_priority();
        for (i, tid) in self.ready.iter().enumerate().skip(1) {
            let prio = self.threads[tid.0].as_ref().unwrap().effective_priority();
            if ActivePolicy::better(prio, best_prio) {
                best_idx = i;
                best_prio = prio;
            }
        }
        self.ready.remove(best_idx)
    }
}

/// `None` until [`init`] runs.
static mut INNER: Option<Inner> = None;
static STARTED: AtomicBool = AtomicBool::new(false);

fn with_inner<R>(f: impl FnOnce(&mut Inner) -> R) -> R {
    // SAFETY: callers only reach here with interrupts disabled (either a raw
    // `cli` bracket in this module or the fact that we are still in early
    // boot, single-threaded, before `start()`), so this is never re-entered.
    unsafe { f(INNER.as_mut().expect("sched::init not called")) }
}

/// Sets up the idle thread and the empty ready/sleep sets. Must run once,
/// after the heap is initialized and before any other thread is created.
pub fn init(idle_entry: extern "C" fn(usize) -> usize) {
    let stack = alloc::vec![0u8; DEFAULT_STACK_SIZE].into_boxed_slice();
    let stack_top = stack.as_ptr() as usize + stack.len();
    let context = X86_64::build_initial_context(stack_top, idle_entry, 0);
    let mut idle = Tcb::new(ThreadId(0), stack, context, i32::MIN, DetachState::Detached);
    idle.arm_watermark();
    idle.state = ThreadState::Running;

    let inner = Inner {
        threads: alloc::vec![Some(Box::new(idle))],
        ready: VecDeque::new(),
        sleeping: BinaryHeap::new(),
        current: ThreadId(0),
        idle: ThreadId(0),
    };
    unsafe { INNER = Some(inner) };
}

/// Creates a new thread and inserts it into the ready set. Returns the
/// handle the caller uses for `join`/`detach`/`set_priority`.
pub fn spawn(
    entry: extern "C" fn(usize) -> usize,
    arg: usize,
    stack_size: usize,
    priority: i32,
    detach: DetachState,
) -> ThreadId {
    let stack = alloc::vec![0u8; stack_size].into_boxed_slice();
    let stack_top = stack.as_ptr() as usize + stack.len();
    let context = X86_64::build_initial_context(stack_top, entry, arg);

    irq::disable();
    let id = with_inner(|inner| {
        let idx = inner.threads.len();
        let id = ThreadId(idx);
        let mut tcb = Tcb::new(id, stack, context, priority, detach);
        tcb.arm_watermark();
        inner.threads.push(Some(Box::new(tcb)));
        inner.ready.push_back(id);
        id
    });
    irq::enable();
    id
}

/// Switches into the first real thread and never returns. Called exactly
/// once by `main` after all boot-time threads have been spawned.
pub fn start() -> ! {
    STARTED.store(true, Ordering::SeqCst);
    irq::disable();
    let next = with_inner(|inner| inner.pick_ready().unwrap_or(inner.idle));
    with_inner(|inner| inner.slot(next).state = ThreadState::Running);
    with_inner(|inner| inner.current = next);

    // There is no "outgoing" context worth saving - boot never resumes -
    // so switch into `next` directly using a throwaway save slot.
    let mut discard = Context::zeroed();
    let next_ctx_ptr = with_inner(|inner| &inner.slot(next).context as *const Context);
    unsafe { X86_64::switch_to(&mut discard, next_ctx_ptr) };
    unreachable!("boot context must never be resumed");
}

pub fn current() -> ThreadId {
    with_inner(|inner| inner.current)
}

/// Overrides `current()` without driving a real switch. Scenario tests use
/// this to impersonate a specific thread when exercising code that reads
/// `current()` - e.g. wake's preemption check - without engaging
/// `switch_to`'s raw stack swap, which a host test can never resume from
/// since nothing fires the timer interrupts that would switch it back.
#[cfg(test)]
pub(crate) fn set_current_for_test(id: ThreadId) {
    with_inner(|inner| inner.current = id);
}

pub fn effective_priority(id: ThreadId) -> i32 {
    with_inner(|inner| inner.slot(id).effective_priority())
}

pub fn set_effective_priority(id: ThreadId, prio: i32) {
    with_inner(|inner| {
        inner
            .slot(id)
            .eff_priority
            .store(prio, Ordering::SeqCst)
    });
}

pub fn base_priority(id: ThreadId) -> i32 {
    with_inner(|inner| inner.slot(id).base_priority())
}

#[cfg(test)]
pub(crate) fn state_for_test(id: ThreadId) -> ThreadState {
    with_inner(|inner| inner.slot(id).state)
}

#[cfg(test)]
pub(crate) fn set_state_for_test(id: ThreadId, state: ThreadState) {
    with_inner(|inner| inner.slot(id).state = state);
}

pub fn set_base_priority(id: ThreadId, prio: i32) {
    with_inner(|inner| inner.slot(id).base_priority.store(prio, Ordering::SeqCst));
}

/// Address of the `RawMutex` thread `id` is currently blocked trying to
/// lock, or 0. Used by the mutex module to walk blocked-on -> owner chains
/// when propagating priority inheritance.
pub fn blocked_on_mutex(id: ThreadId) -> usize {
    irq::disable();
    let v = with_inner(|inner| inner.slot(id).blocked_on_mutex.load(Ordering::SeqCst));
    irq::enable();
    v
}

pub fn set_blocked_on_mutex(id: ThreadId, addr: usize) {
    irq::disable();
    with_inner(|inner| inner.slot(id).blocked_on_mutex.store(addr, Ordering::SeqCst));
    irq::enable();
}

/// Head of thread `id`'s intrusive list of currently-owned mutexes, or 0.
pub fn owned_mutexes_head(id: ThreadId) -> usize {
    irq::disable();
    let v = with_inner(|inner| inner.slot(id).owned_mutexes.load(Ordering::SeqCst));
    irq::enable();
    v
}

pub fn set_owned_mutexes_head(id: ThreadId, addr: usize) {
    irq::disable();
    with_inner(|inner| inner.slot(id).owned_mutexes.store(addr, Ordering::SeqCst));
    irq::enable();
}

/// Configured stack size for thread `id`, in bytes.
pub fn stack_size(id: ThreadId) -> usize {
    irq::disable();
    let v = with_inner(|inner| inner.slot(id).stack_size());
    irq::enable();
    v
}

/// Bytes of stack never touched by thread `id`, above its watermark word -
/// the worst-case headroom ever observed.
pub fn absolute_free_stack(id: ThreadId) -> usize {
    irq::disable();
    let v = with_inner(|inner| inner.slot(id).absolute_free_stack());
    irq::enable();
    v
}

/// Bytes currently free on thread `id`'s stack. Reads the live `rsp`
/// register when `id` is the calling thread (its saved context is stale
/// while it's running); otherwise reads the parked context.
pub fn current_free_stack(id: ThreadId) -> usize {
    irq::disable();
    let live_rsp = if id == current() {
        let rsp: u64;
        unsafe { core::arch::asm!("mov {}, rsp", out(reg) rsp) };
        Some(rsp)
    } else {
        None
    };
    let v = with_inner(|inner| inner.slot(id).current_free_stack(live_rsp));
    irq::enable();
    v
}

pub fn request_terminate(id: ThreadId) {
    with_inner(|inner| inner.slot(id).terminate_requested.store(true, Ordering::SeqCst));
}

pub fn test_terminate() -> bool {
    with_inner(|inner| {
        inner
            .slot(inner.current)
            .terminate_requested
            .load(Ordering::SeqCst)
    })
}

fn watermark_check(id: ThreadId) {
    let ok = with_inner(|inner| inner.slot(id).watermark_intact());
    if !ok {
        crate::lib::error::fatal("stack watermark corrupted");
    }
}

/// Verifies the outgoing thread's stack watermark, transitions it per
/// `outgoing_state`, picks the next thread (falling back to idle), and
/// switches. Must be called with interrupts already disabled; re-enables
/// them before returning.
fn reschedule(outgoing_state: ThreadState, requeue_outgoing: bool) {
    let cur = with_inner(|inner| inner.current);
    watermark_check(cur);

    let next = with_inner(|inner| {
        if requeue_outgoing && cur != inner.idle {
            inner.ready.push_back(cur);
        }
        inner.slot(cur).state = outgoing_state;
        let next = inner.pick_ready().unwrap_or(inner.idle);
        inner.slot(next).state = ThreadState::Running;
        inner.current = next;
        next
    });

    if next != cur {
        let (out_ptr, in_ptr) = with_inner(|inner| {
            (
                &mut inner.slot(cur).context as *mut Context,
                &inner.slot(next).context as *const Context,
            )
        });
        unsafe { X86_64::switch_to(out_ptr, in_ptr) };
    }
    irq::enable();
}

/// Voluntary reschedule; the current thread remains Ready.
pub fn yield_now() {
    irq::disable();
    reschedule(ThreadState::Ready, true);
}

/// Moves the current thread into the sleep set until `tick`, rearms the
/// Time Source if this is now the earliest deadline, and switches away. A
/// `tick` at or before `now` still costs exactly one reschedule, per
/// `sleep_until(now)` returning within one scheduler tick.
pub fn sleep_until(tick: u64) {
    irq::disable();
    let cur = with_inner(|inner| inner.current);
    with_inner(|inner| {
        inner.slot(cur).sleep_until = tick;
        inner.sleeping.push(Reverse((tick, cur)));
    });
    crate::time_source::schedule_irq_at(
        with_inner(|inner| inner.sleeping.peek().map(|Reverse((t, _))| *t)).unwrap_or(tick),
    );
    reschedule(ThreadState::Sleeping, false);
}

/// Parks the current thread as `Waiting` without adding it back to the
/// ready set. Caller (mutex/condvar/fifo) is responsible for having already
/// linked it into its own wait queue before calling this, and must not be
/// holding a `GlobalDisable`/`FastGlobalDisable` guard across the call -
/// only the raw `cli` this function itself issues.
pub fn block_current_and_switch(reason: WaitReason) {
    irq::disable();
    let cur = with_inner(|inner| inner.current);
    with_inner(|inner| inner.slot(cur).wait_reason = reason);
    reschedule(ThreadState::Waiting, false);
}

/// Moves a Waiting/Sleeping thread to Ready. Preempts the running thread
/// immediately if the woken thread now has strictly better priority.
pub fn wake(id: ThreadId) {
    irq::disable();
    let should_preempt = with_inner(|inner| {
        if inner.slot(id).state == ThreadState::Terminated {
            return false;
        }
        inner.slot(id).state = ThreadState::Ready;
        inner.slot(id).wait_reason = WaitReason::None;
        inner.ready.push_back(id);
        if inner.current == inner.idle {
            return true;
        }
        let woken_prio = inner.prio_of(id);
        let cur_prio = inner.prio_of(inner.current);
        ActivePolicy::better(woken_prio, cur_prio)
    });
    if should_preempt {
        reschedule(ThreadState::Ready, true);
    } else {
        irq::enable();
    }
}

/// Wakes every Sleeping thread whose deadline is due, called by the Time
/// Source on every tick. Returns the next-smallest remaining deadline, if
/// any, so the caller can rearm the hardware timer.
pub fn wake_due_sleepers(now: u64) -> Option<u64> {
    irq::disable();
    let mut any_preempt_candidate = None;
    with_inner(|inner| {
        while let Some(&Reverse((tick, id))) = inner.sleeping.peek() {
            if tick > now {
                break;
            }
            inner.sleeping.pop();
            if inner.slot(id).state != ThreadState::Sleeping {
                continue; // terminated or otherwise reclaimed while parked
            }
            inner.slot(id).state = ThreadState::Ready;
            inner.ready.push_back(id);
            any_preempt_candidate = Some(id);
        }
    });
    let next = with_inner(|inner| inner.sleeping.peek().map(|Reverse((t, _))| *t));
    irq::enable();
    next
}

/// Called from the timer interrupt handler after the Time Source has woken
/// any due sleepers: picks the best Ready thread and preempts if it beats
/// the thread that was running when the tick landed, or rotates to the next
/// thread at the same priority level ("round-robin within a level").
/// `reschedule`'s `requeue_outgoing = true` pushes the current thread to the
/// back of the ready set before `pick_ready` scans it front-to-back, so a
/// same-priority neighbour already waiting at the front is exactly what
/// gets picked next.
pub fn on_tick() {
    irq::disable();
    let should_switch = with_inner(|inner| {
        if inner.ready.is_empty() {
            return false;
        }
        if inner.current == inner.idle {
            return true;
        }
        let cur_prio = inner.prio_of(inner.current);
        inner.ready.iter().any(|id| {
            let prio = inner.prio_of(*id);
            ActivePolicy::better(prio, cur_prio) || prio == cur_prio
        })
    });
    if should_switch {
        reschedule(ThreadState::Ready, true);
    } else {
        irq::enable();
    }
}

/// Called by the thread launcher once `entry` returns: marks the thread
/// Terminated (or JoinableTerminated if joinable), wakes any joiners, and
/// switches away forever.
pub fn terminate_current(result: usize) -> ! {
    irq::disable();
    let cur = with_inner(|inner| inner.current);
    let joiners = with_inner(|inner| {
        let tcb = inner.slot(cur);
        tcb.join_result = Some(result);
        tcb.state = match tcb.detach_state {
            DetachState::Joinable => ThreadState::JoinableTerminated,
            DetachState::Detached => ThreadState::Terminated,
        };
        core::mem::take(&mut tcb.joiners)
    });
    irq::enable();
    for joiner in joiners {
        wake(joiner);
    }
    irq::disable();
    reschedule(ThreadState::Terminated, false);
    unreachable!("terminated thread must never be rescheduled");
}

/// Detaches a thread: if already terminated, reclaims its TCB/stack now;
/// otherwise marks it to be reclaimed automatically on termination.
pub fn detach(id: ThreadId) {
    irq::disable();
    with_inner(|inner| {
        let reap = matches!(inner.slot(id).state, ThreadState::JoinableTerminated);
        inner.slot(id).detach_state = DetachState::Detached;
        if reap {
            inner.slot(id).state = ThreadState::Terminated;
            inner.threads[id.0] = None;
        }
    });
    irq::enable();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    JoinSelf,
    AlreadyJoined,
    JoinDetached,
}

/// Blocks until `id` terminates, then reclaims its TCB/stack and returns its
/// result word.
pub fn join(id: ThreadId) -> Result<usize, JoinError> {
    if id == current() {
        return Err(JoinError::JoinSelf);
    }
    loop {
        irq::disable();
        let outcome = with_inner(|inner| {
            if inner.threads[id.0].is_none() {
                return Some(Err(JoinError::AlreadyJoined));
            }
            let tcb = inner.slot(id);
            if tcb.detach_state == DetachState::Detached {
                return Some(Err(JoinError::JoinDetached));
            }
            match tcb.state {
                ThreadState::JoinableTerminated => {
                    let result = tcb.join_result.take().unwrap();
                    inner.threads[id.0] = None;
                    Some(Ok(result))
                }
                _ => {
                    tcb.joiners.push(inner.current);
                    None
                }
            }
        });
        match outcome {
            Some(result) => {
                irq::enable();
                return result;
            }
            None => block_current_and_switch(WaitReason::Join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_ordering_is_ascending() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((50u64, ThreadId(1))));
        heap.push(Reverse((10u64, ThreadId(2))));
        heap.push(Reverse((30u64, ThreadId(3))));
        let Reverse((tick, id)) = heap.pop().unwrap();
        assert_eq!(tick, 10);
        assert_eq!(id, ThreadId(2));
    }
}
