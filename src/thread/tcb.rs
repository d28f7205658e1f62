//! Thread Control Block: the per-thread state the scheduler and the
//! synchronization primitives move between ready/wait/sleep collections.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::context::Context;

/// Fill word written at the low end of every thread's stack. A context
/// switch that finds anything else there has found a stack overflow.
pub const STACK_WATERMARK: u64 = 0xDEAD_C0DE_FEED_FACE;

/// Fill byte stamped across the rest of a fresh stack, above the watermark
/// word. A thread that has never touched a given byte leaves it at this
/// value, so scanning inward from the low end finds exactly how deep the
/// stack has ever been used (the "absolute free stack" memory-profiling
/// figure) - the same high-water-mark technique the watermark word itself
/// uses, just carried across the whole stack instead of one word.
const STACK_FILL_BYTE: u8 = 0xA5;

/// Opaque thread handle. Index into the global TCB table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Sleeping,
    Waiting,
    Terminated,
    JoinableTerminated,
}

/// What a `Waiting` thread is parked on, purely for diagnostics - the wait
/// queue itself is owned by the primitive (mutex/condvar/fifo), not the TCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    None,
    Mutex,
    CondVar,
    FifoNotFull,
    FifoNotEmpty,
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachState {
    Joinable,
    Detached,
}

pub struct Tcb {
    pub id: ThreadId,
    pub context: Context,
    stack: Box<[u8]>,
    pub base_priority: AtomicI32,
    pub eff_priority: AtomicI32,
    pub state: ThreadState,
    pub wait_reason: WaitReason,
    /// Absolute tick at which a `Sleeping` thread should wake; meaningless
    /// in any other state.
    pub sleep_until: u64,
    pub terminate_requested: AtomicBool,
    pub detach_state: DetachState,
    /// Set once the thread's entry function returns; consumed exactly once
    /// by `join`.
    pub join_result: Option<usize>,
    /// Threads parked on this one via `join`, woken on termination.
    pub joiners: Vec<ThreadId>,
    /// Address of the `RawMutex` this thread is currently blocked trying to
    /// lock, or 0. Lets priority inheritance walk blocked-on -> owner chains
    /// across mutexes without the mutex module needing to know about the
    /// TCB table's layout.
    pub blocked_on_mutex: AtomicUsize,
    /// Head of this thread's intrusive list of currently-held mutexes
    /// (linked through each `RawMutex`'s own `owned_link`), or 0. Consulted
    /// when recomputing this thread's effective priority as inheritance
    /// unwinds on unlock.
    pub owned_mutexes: AtomicUsize,
}

impl Tcb {
    pub fn new(
        id: ThreadId,
        stack: Box<[u8]>,
        context: Context,
        priority: i32,
        detach_state: DetachState,
    ) -> Self {
        Self {
            id,
            context,
            stack,
            base_priority: AtomicI32::new(priority),
            eff_priority: AtomicI32::new(priority),
            state: ThreadState::Ready,
            wait_reason: WaitReason::None,
            sleep_until: 0,
            terminate_requested: AtomicBool::new(false),
            detach_state,
            join_result: None,
            joiners: Vec::new(),
            blocked_on_mutex: AtomicUsize::new(0),
            owned_mutexes: AtomicUsize::new(0),
        }
    }

    pub fn stack_top(&self) -> usize {
        self.stack.as_ptr() as usize + self.stack.len()
    }

    pub fn stack_base(&self) -> usize {
        self.stack.as_ptr() as usize
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Stamps the watermark word at the low end of the stack and fills the
    /// rest with `STACK_FILL_BYTE`. Must be called once, right after
    /// allocation, before the thread first runs.
    pub fn arm_watermark(&mut self) {
        for b in self.stack.iter_mut() {
            *b = STACK_FILL_BYTE;
        }
        let base = self.stack.as_mut_ptr() as *mut u64;
        unsafe { *base = STACK_WATERMARK };
    }

    /// Checked on every context switch out of this thread. A mismatch means
    /// the stack overflowed into the watermark word and is fatal.
    pub fn watermark_intact(&self) -> bool {
        let base = self.stack.as_ptr() as *const u64;
        unsafe { *base == STACK_WATERMARK }
    }

    /// Bytes of stack that have never been touched, measured from the low
    /// end, above the watermark word. This only shrinks over the thread's
    /// lifetime - it's the worst-case headroom ever observed, not the
    /// current one.
    pub fn absolute_free_stack(&self) -> usize {
        self.stack
            .iter()
            .skip(core::mem::size_of::<u64>())
            .take_while(|&&b| b == STACK_FILL_BYTE)
            .count()
    }

    /// Bytes currently free between the thread's parked stack pointer and
    /// the low end of its stack. `live_rsp` is the actual CPU `rsp` when
    /// called for the currently-running thread (its saved `Context` isn't
    /// updated until the next switch-out); `None` reads the saved context
    /// instead, which is correct for every other thread.
    pub fn current_free_stack(&self, live_rsp: Option<u64>) -> usize {
        let rsp = live_rsp.unwrap_or_else(|| self.context.saved_rsp()) as usize;
        rsp.saturating_sub(self.stack_base())
    }

    pub fn effective_priority(&self) -> i32 {
        self.eff_priority.load(Ordering::SeqCst)
    }

    pub fn base_priority(&self) -> i32 {
        self.base_priority.load(Ordering::SeqCst)
    }
}
