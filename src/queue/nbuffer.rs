//! N-Buffer Queue<T,SIZE,NUMBUF> (NB): a circular pool of fixed-size byte
//! buffers that hands off whole buffers from one producer to one consumer
//! with no per-byte copying or locking.
//!
//! All operations are IRQ-safe nonblocking - unlike the FIFO Queue there is
//! no wait-until-ready variant here; a producer (typically an interrupt
//! handler) that finds every buffer still full simply has nowhere to put
//! the next sample and must decide for itself what to do (the Logger
//! demonstrator counts it as dropped). Each buffer is checked out to at
//! most one side at a time by index, so `get_writable`/`get_readable` never
//! alias the same slot.

use core::cell::{Cell, UnsafeCell};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::critical::FastGlobalDisable;

pub struct NBuffer<const SIZE: usize, const NUMBUF: usize> {
    buffers: UnsafeCell<[[u8; SIZE]; NUMBUF]>,
    actual_size: UnsafeCell<[usize; NUMBUF]>,
    put_idx: Cell<usize>,
    get_idx: Cell<usize>,
    filled: AtomicUsize,
    writer_checked_out: Cell<Option<usize>>,
    reader_checked_out: Cell<Option<usize>>,
}

unsafe impl<const SIZE: usize, const NUMBUF: usize> Sync for NBuffer<SIZE, NUMBUF> {}

impl<const SIZE: usize, const NUMBUF: usize> NBuffer<SIZE, NUMBUF> {
    /// `numbuf = 1` can't distinguish "producer's buffer" from "consumer's
    /// buffer", so it's rejected at compile time instead of at the first
    /// handoff.
    const ASSERT_NUMBUF: () = assert!(NUMBUF >= 2, "NBuffer<T, SIZE, NUMBUF> requires NUMBUF >= 2");

    pub const fn new() -> Self {
        let _ = Self::ASSERT_NUMBUF;
        Self {
            buffers: UnsafeCell::new([[0u8; SIZE]; NUMBUF]),
            actual_size: UnsafeCell::new([0usize; NUMBUF]),
            put_idx: Cell::new(0),
            get_idx: Cell::new(0),
            filled: AtomicUsize::new(0),
            writer_checked_out: Cell::new(None),
            reader_checked_out: Cell::new(None),
        }
    }

    /// Hands out the next empty buffer for the producer to fill in place.
    /// Returns `None` if every buffer is already full.
    pub fn get_writable(&self) -> Option<&mut [u8]> {
        let _g = FastGlobalDisable::new();
        if self.filled.load(Ordering::Acquire) >= NUMBUF {
            return None;
        }
        let idx = self.put_idx.get();
        self.writer_checked_out.set(Some(idx));
        let buf: &mut [u8] = unsafe { &mut (*self.buffers.get())[idx] };
        Some(buf)
    }

    /// Publishes the buffer most recently handed out by `get_writable` to
    /// the consumer side. `actual_size` is clamped to `SIZE`.
    pub fn mark_filled(&self, actual_size: usize) {
        let _g = FastGlobalDisable::new();
        let idx = self
            .writer_checked_out
            .take()
            .expect("mark_filled without a matching get_writable");
        unsafe { (*self.actual_size.get())[idx] = actual_size.min(SIZE) };
        self.put_idx.set((idx + 1) % NUMBUF);
        self.filled.fetch_add(1, Ordering::Release);
    }

    /// Hands out the next full buffer for the consumer to read in place,
    /// along with its actual (possibly short) size. Returns `None` if
    /// nothing has been published yet.
    pub fn get_readable(&self) -> Option<(&[u8], usize)> {
        let _g = FastGlobalDisable::new();
        if self.filled.load(Ordering::Acquire) == 0 {
            return None;
        }
        let idx = self.get_idx.get();
        self.reader_checked_out.set(Some(idx));
        let size = unsafe { (*self.actual_size.get())[idx] };
        let buf: &[u8] = unsafe { &(*self.buffers.get())[idx][..size] };
        Some((buf, size))
    }

    /// Returns the buffer most recently handed out by `get_readable` to the
    /// producer pool.
    pub fn mark_emptied(&self) {
        let _g = FastGlobalDisable::new();
        let idx = self
            .reader_checked_out
            .take()
            .expect("mark_emptied without a matching get_readable");
        self.get_idx.set((idx + 1) % NUMBUF);
        self.filled.fetch_sub(1, Ordering::Release);
    }

    /// Empties the pool and re-initializes indices. Any outstanding
    /// checked-out buffer reference becomes invalid.
    pub fn reset(&self) {
        let _g = FastGlobalDisable::new();
        self.put_idx.set(0);
        self.get_idx.set(0);
        self.filled.store(0, Ordering::SeqCst);
        self.writer_checked_out.set(None);
        self.reader_checked_out.set(None);
    }

    pub fn is_empty(&self) -> bool {
        self.filled.load(Ordering::Acquire) == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled.load(Ordering::Acquire) >= NUMBUF
    }

    pub fn available_for_reading(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    pub fn available_for_writing(&self) -> usize {
        NUMBUF - self.filled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_publishes_actual_size() {
        let nb: NBuffer<8, 2> = NBuffer::new();
        let w = nb.get_writable().unwrap();
        w[0] = 0xAB;
        nb.mark_filled(1);
        let (buf, size) = nb.get_readable().unwrap();
        assert_eq!(size, 1);
        assert_eq!(buf[0], 0xAB);
        nb.mark_emptied();
        assert!(nb.is_empty());
    }

    #[test]
    fn full_pool_rejects_further_writers() {
        let nb: NBuffer<4, 2> = NBuffer::new();
        assert!(nb.get_writable().is_some());
        nb.mark_filled(4);
        assert!(nb.get_writable().is_some());
        nb.mark_filled(4);
        assert!(nb.is_full());
        assert!(nb.get_writable().is_none());
    }
}
