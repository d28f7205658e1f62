//! Fixed-capacity FIFO Queue<T,N> (FQ): a bounded single-producer/
//! single-consumer channel with both IRQ-safe nonblocking endpoints and
//! blocking thread-context endpoints layered on top of the same ring.
//!
//! The ring itself is [`crate::channel::spsc::Spsc`] - lock-free, so the
//! nonblocking `irq_*` operations are safe to call from an interrupt
//! handler with no critical section of their own. The blocking `put`/`get`
//! add exactly one waiter slot per side (this is SPSC: at most one producer
//! and one consumer can ever be waiting at a time) and wake that waiter
//! under `FastGlobalDisable` whenever the opposite side makes progress.

use core::cell::Cell;

use crate::channel::spsc::Spsc;
use crate::sched;
use crate::sync::critical::FastGlobalDisable;
use crate::thread::tcb::{ThreadId, WaitReason};

pub struct Fifo<T: Copy, const N: usize> {
    ring: Spsc<T, N>,
    not_full_waiter: Cell<Option<ThreadId>>,
    not_empty_waiter: Cell<Option<ThreadId>>,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for Fifo<T, N> {}

impl<T: Copy, const N: usize> Fifo<T, N> {
    /// Evaluated the first time it's referenced from `new`. `Fifo<T, N>`
    /// holds a full N items (see `Spsc`'s `count` field); `N < 2` is
    /// rejected per the spec's own boundary rule ("FIFO with N=0 or 1 must
    /// be rejected at compile time") rather than left as a runtime surprise.
    const ASSERT_CAPACITY: () = assert!(N >= 2, "Fifo<T, N> requires N >= 2");

    pub const fn new() -> Self {
        let _ = Self::ASSERT_CAPACITY;
        Self {
            ring: Spsc::new(),
            not_full_waiter: Cell::new(None),
            not_empty_waiter: Cell::new(None),
        }
    }

    // ---- IRQ-safe, nonblocking ----

    pub fn irq_try_put(&self, v: T) -> bool {
        let _g = FastGlobalDisable::new();
        match self.ring.try_enqueue(v) {
            Ok(()) => {
                self.wake_not_empty();
                true
            }
            Err(_) => false,
        }
    }

    pub fn irq_try_get(&self) -> Option<T> {
        let _g = FastGlobalDisable::new();
        let v = self.ring.try_dequeue();
        if v.is_some() {
            self.wake_not_full();
        }
        v
    }

    /// Alias for `irq_try_put`, callable from thread context.
    pub fn try_put(&self, v: T) -> bool {
        self.irq_try_put(v)
    }

    /// Alias for `irq_try_get`, callable from thread context.
    pub fn try_get(&self) -> Option<T> {
        self.irq_try_get()
    }

    /// Alias for `irq_try_put`, named the way an ISR calls it.
    pub fn irq_put(&self, v: T) -> bool {
        self.irq_try_put(v)
    }

    /// Alias for `irq_try_get`, named the way an ISR calls it.
    pub fn irq_get(&self) -> Option<T> {
        self.irq_try_get()
    }

    pub fn irq_is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn irq_is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn irq_reset(&self) {
        let _g = FastGlobalDisable::new();
        while self.ring.try_dequeue().is_some() {}
        self.not_full_waiter.set(None);
        self.not_empty_waiter.set(None);
    }

    // ---- Thread-context conveniences ----

    pub fn is_empty(&self) -> bool {
        self.irq_is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.irq_is_full()
    }

    pub fn reset(&self) {
        self.irq_reset();
    }

    /// Blocks the calling thread until a `put` would not have to wait.
    pub fn wait_until_not_full(&self) {
        loop {
            {
                let _g = FastGlobalDisable::new();
                if !self.ring.is_full() {
                    return;
                }
                self.not_full_waiter.set(Some(sched::current()));
            }
            sched::block_current_and_switch(WaitReason::FifoNotFull);
        }
    }

    /// Blocks the calling thread until a `get` would not have to wait.
    pub fn wait_until_not_empty(&self) {
        loop {
            {
                let _g = FastGlobalDisable::new();
                if !self.ring.is_empty() {
                    return;
                }
                self.not_empty_waiter.set(Some(sched::current()));
            }
            sched::block_current_and_switch(WaitReason::FifoNotEmpty);
        }
    }

    /// Blocks until there is room, then enqueues.
    pub fn put(&self, v: T) {
        loop {
            self.wait_until_not_full();
            if self.irq_try_put(v) {
                return;
            }
        }
    }

    /// Blocks until an element is available, then dequeues it.
    pub fn get(&self) -> T {
        loop {
            self.wait_until_not_empty();
            if let Some(v) = self.irq_try_get() {
                return v;
            }
        }
    }

    fn wake_not_empty(&self) {
        if let Some(id) = self.not_empty_waiter.take() {
            sched::wake(id);
        }
    }

    fn wake_not_full(&self) {
        if let Some(id) = self.not_full_waiter.take() {
            sched::wake(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_put_get_roundtrip() {
        let q: Fifo<u32, 4> = Fifo::new();
        assert!(q.irq_is_empty());
        assert!(q.irq_try_put(7));
        assert!(!q.irq_is_empty());
        assert_eq!(q.irq_try_get(), Some(7));
        assert!(q.irq_is_empty());
    }

    #[test]
    fn irq_try_put_fails_when_full() {
        // An N-slot Fifo holds a full N items.
        let q: Fifo<u32, 2> = Fifo::new();
        assert!(q.irq_try_put(1));
        assert!(!q.irq_is_full());
        assert!(q.irq_try_put(2));
        assert!(q.irq_is_full());
        assert!(!q.irq_try_put(3));
    }

    #[test]
    fn reset_drains_all_entries() {
        let q: Fifo<u32, 4> = Fifo::new();
        q.irq_try_put(1);
        q.irq_try_put(2);
        q.reset();
        assert!(q.irq_is_empty());
    }
}
