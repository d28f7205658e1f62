//! Lock-free Single-Producer Single-Consumer ring buffer.
//! Suitable for zero-copy handle passing in Phase 1.

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct Spsc<T: Copy, const N: usize> {
    buf: [MaybeUninit<T>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    // Tracked separately from head/tail so the ring holds a full N items
    // instead of reserving a slot to disambiguate full from empty. Producer
    // only ever `fetch_add`s it, consumer only ever `fetch_sub`s it - still
    // safe for a single producer / single consumer with no shared mutation.
    count: AtomicUsize,
}

impl<T: Copy, const N: usize> Spsc<T, N> {
    pub const fn new() -> Self {
        // const-init workaround: MaybeUninit::uninit_array not const-stable in core for all versions
        Self {
            buf: unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init() },
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize { N }

    #[inline(always)]
    pub fn try_enqueue(&self, v: T) -> Result<(), T> {
        if self.count.load(Ordering::Acquire) == N { return Err(v); }
        let tail = self.tail.load(Ordering::Relaxed);
        unsafe {
            let slot = self.buf.as_ptr().add(tail) as *mut MaybeUninit<T>;
            core::ptr::write((*slot).as_mut_ptr(), v);
        }
        self.tail.store((tail + 1) % N, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    #[inline(always)]
    pub fn try_dequeue(&self) -> Option<T> {
        if self.count.load(Ordering::Acquire) == 0 { return None; }
        let head = self.head.load(Ordering::Relaxed);
        let v = unsafe {
            let slot = self.buf.as_ptr().add(head) as *const MaybeUninit<T>;
            core::ptr::read((*slot).as_ptr())
        };
        self.head.store((head + 1) % N, Ordering::Relaxed);
        self.count.fetch_sub(1, Ordering::Release);
        Some(v)
    }

    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.count.load(Ordering::Relaxed) == N
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count.load(Ordering::Relaxed) == 0
    }
}
