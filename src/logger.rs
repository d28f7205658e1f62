//! Logger (LG, §4.11): a representative client layered entirely on the core
//! primitives - nonblocking producers from arbitrary threads, a pack thread,
//! a write thread, and a stats thread connected by an FQ and an NB. Nothing
//! here reaches below `queue`/`sync`/`thread`; it exists to exercise every
//! contract those modules make simultaneously.
//!
//! `empty_records`/`full_records` are [`crate::queue::Fifo`] instances, whose
//! ring is SPSC. Arbitrary producer threads call `log()` from both sides of
//! each queue concurrently (many producers draining `empty_records`, many
//! producers filling `full_records`), which a strict SPSC channel can't
//! normally tolerate. It is sound here only because every operation on
//! those queues runs under `FastGlobalDisable`: on this uniprocessor kernel
//! that both excludes interrupt handlers and prevents the scheduler from
//! preempting to another thread mid-operation, so the two "producers"
//! (or two "consumers") on a given queue are always strictly serialized -
//! there is never more than one of them inside the ring at once. A second
//! CPU would break this; there is only one here.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::queue::{Fifo, NBuffer};
use crate::thread::{self, DetachState, ThreadId};

/// Index value that can never name a real record slot; pushed onto
/// `full_records` by `stop()` to tell the pack thread to flush and exit.
const SENTINEL: usize = usize::MAX;

/// How often the stats thread refreshes its cached snapshot.
const STATS_PERIOD_TICKS: u64 = 100;

const PACK_PRIORITY: i32 = 20;
const WRITE_PRIORITY: i32 = 15;
const STATS_PRIORITY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogResult {
    Queued,
    Dropped,
    Ignored,
    TooLarge,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerStats {
    pub queued: u64,
    pub dropped: u64,
    pub too_large: u64,
    pub ignored: u64,
    pub buffers_written: u64,
    pub bytes_written: u64,
}

struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    too_large: AtomicU64,
    ignored: AtomicU64,
    buffers_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl Counters {
    const fn new() -> Self {
        Self {
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            too_large: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            buffers_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> LoggerStats {
        LoggerStats {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            too_large: self.too_large.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            buffers_written: self.buffers_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Workers {
    pack: Option<ThreadId>,
    write: Option<ThreadId>,
    stats: Option<ThreadId>,
}

/// `RECORD_CAP`: max serialized bytes per record. `NUM_RECORDS`: size of the
/// record pool. `QCAP` must equal `NUM_RECORDS` (an `N`-slot `Fifo` holds a
/// full `N` items; `empty_records`/`full_records` each need room for every
/// record in the pool at once). `BUF_SIZE`/`NUM_BUFS`: the N-Buffer Queue
/// backing bulk writes.
pub struct Logger<
    const RECORD_CAP: usize,
    const NUM_RECORDS: usize,
    const QCAP: usize,
    const BUF_SIZE: usize,
    const NUM_BUFS: usize,
> {
    record_data: core::cell::UnsafeCell<[[u8; RECORD_CAP]; NUM_RECORDS]>,
    record_len: core::cell::UnsafeCell<[usize; NUM_RECORDS]>,
    empty_records: Fifo<usize, QCAP>,
    full_records: Fifo<usize, QCAP>,
    buffers: NBuffer<BUF_SIZE, NUM_BUFS>,
    counters: Counters,
    cached: Mutex<LoggerStats>,
    running: AtomicBool,
    workers: Mutex<Workers>,
}

unsafe impl<
        const RECORD_CAP: usize,
        const NUM_RECORDS: usize,
        const QCAP: usize,
        const BUF_SIZE: usize,
        const NUM_BUFS: usize,
    > Sync for Logger<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS>
{
}

impl<
        const RECORD_CAP: usize,
        const NUM_RECORDS: usize,
        const QCAP: usize,
        const BUF_SIZE: usize,
        const NUM_BUFS: usize,
    > Logger<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS>
{
    const ASSERT_SHAPE: () = assert!(
        QCAP == NUM_RECORDS && NUM_RECORDS >= 2 && BUF_SIZE >= RECORD_CAP && NUM_BUFS >= 2,
        "Logger<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS> requires QCAP == NUM_RECORDS (>= 2), BUF_SIZE >= RECORD_CAP, NUM_BUFS >= 2"
    );

    pub const fn new() -> Self {
        let _ = Self::ASSERT_SHAPE;
        Self {
            record_data: core::cell::UnsafeCell::new([[0u8; RECORD_CAP]; NUM_RECORDS]),
            record_len: core::cell::UnsafeCell::new([0usize; NUM_RECORDS]),
            empty_records: Fifo::new(),
            full_records: Fifo::new(),
            buffers: NBuffer::new(),
            counters: Counters::new(),
            cached: Mutex::new(LoggerStats {
                queued: 0,
                dropped: 0,
                too_large: 0,
                ignored: 0,
                buffers_written: 0,
                bytes_written: 0,
            }),
            running: AtomicBool::new(false),
            workers: Mutex::new(Workers { pack: None, write: None, stats: None }),
        }
    }

    /// Fills the empty-records pool and spawns the pack, write and stats
    /// threads. `self` must be `'static` - the worker threads hold a raw
    /// pointer back to it for their whole lifetime.
    pub fn start(&'static self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for idx in 0..NUM_RECORDS {
            self.empty_records.irq_try_put(idx);
        }

        let arg = self as *const Self as usize;
        let pack = thread::create(
            pack_entry::<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS>,
            arg,
            thread::DEFAULT_STACK_SIZE,
            PACK_PRIORITY,
            DetachState::Joinable,
        );
        let write = thread::create(
            write_entry::<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS>,
            arg,
            thread::DEFAULT_STACK_SIZE,
            WRITE_PRIORITY,
            DetachState::Joinable,
        );
        let stats = thread::create(
            stats_entry::<RECORD_CAP, NUM_RECORDS, QCAP, BUF_SIZE, NUM_BUFS>,
            arg,
            thread::DEFAULT_STACK_SIZE,
            STATS_PRIORITY,
            DetachState::Joinable,
        );
        *self.workers.lock() = Workers { pack: Some(pack), write: Some(write), stats: Some(stats) };
    }

    /// Nonblocking; safe from any thread context (not from an interrupt
    /// handler - it may wake a waiter via the scheduler).
    pub fn log(&self, data: &[u8]) -> LogResult {
        if !self.running.load(Ordering::Acquire) {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return LogResult::Ignored;
        }
        if data.len() > RECORD_CAP {
            self.counters.too_large.fetch_add(1, Ordering::Relaxed);
            return LogResult::TooLarge;
        }
        match self.empty_records.irq_try_get() {
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                LogResult::Dropped
            }
            Some(idx) => {
                unsafe {
                    let slot = &mut (*self.record_data.get())[idx];
                    slot[..data.len()].copy_from_slice(data);
                    (*self.record_len.get())[idx] = data.len();
                }
                self.full_records.irq_try_put(idx);
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                LogResult::Queued
            }
        }
    }

    /// Synchronous: pushes the sentinel, joins all three worker threads,
    /// and only then returns. Every queued record and partially filled
    /// buffer has been flushed by the time this returns.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.full_records.put(SENTINEL);
        let ids = {
            let mut w = self.workers.lock();
            (w.pack.take(), w.write.take(), w.stats.take())
        };
        if let (Some(pack), Some(write), Some(stats)) = ids {
            let _ = thread::join(pack);
            let _ = thread::join(write);
            let _ = thread::join(stats);
        }
    }

    pub fn get_stats(&self) -> LoggerStats {
        *self.cached.lock()
    }

    fn pack_loop(&self) {
        let mut scratch = [0u8; BUF_SIZE];
        let mut len = 0usize;
        loop {
            let idx = self.full_records.get();
            if idx == SENTINEL {
                self.flush_scratch(&mut scratch, &mut len);
                self.publish_sentinel_buffer();
                return;
            }
            let (rec_len, src_ptr) = unsafe {
                let rl = (*self.record_len.get())[idx];
                let rd = (*self.record_data.get())[idx].as_ptr();
                (rl, rd)
            };
            if len + rec_len > BUF_SIZE {
                self.flush_scratch(&mut scratch, &mut len);
            }
            unsafe {
                core::ptr::copy_nonoverlapping(src_ptr, scratch.as_mut_ptr().add(len), rec_len);
            }
            len += rec_len;
            self.empty_records.irq_try_put(idx);
        }
    }

    fn flush_scratch(&self, scratch: &mut [u8; BUF_SIZE], len: &mut usize) {
        if *len == 0 {
            return;
        }
        loop {
            if let Some(buf) = self.buffers.get_writable() {
                buf[..*len].copy_from_slice(&scratch[..*len]);
                self.buffers.mark_filled(*len);
                *len = 0;
                return;
            }
            thread::sleep(1);
        }
    }

    /// Publishes a zero-size buffer: the "null Buffer" sentinel the write
    /// thread recognizes as its own stop signal. A normally published
    /// buffer is never zero-size (the pack thread only flushes on overflow
    /// or on this exact exit path), so the two can't be confused.
    fn publish_sentinel_buffer(&self) {
        loop {
            if self.buffers.get_writable().is_some() {
                self.buffers.mark_filled(0);
                return;
            }
            thread::sleep(1);
        }
    }

    fn write_loop(&self) {
        loop {
            match self.buffers.get_readable() {
                Some((data, size)) => {
                    if size == 0 {
                        self.buffers.mark_emptied();
                        return;
                    }
                    crate::arch::x86_64::serial::serial_write(data);
                    self.counters.buffers_written.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_written.fetch_add(size as u64, Ordering::Relaxed);
                    self.buffers.mark_emptied();
                }
                None => thread::sleep(1),
            }
        }
    }

    fn stats_loop(&self) {
        loop {
            *self.cached.lock() = self.counters.snapshot();
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(STATS_PERIOD_TICKS);
        }
    }
}

extern "C" fn pack_entry<
    const RC: usize,
    const NR: usize,
    const QC: usize,
    const BS: usize,
    const NB: usize,
>(
    arg: usize,
) -> usize {
    let logger = unsafe { &*(arg as *const Logger<RC, NR, QC, BS, NB>) };
    logger.pack_loop();
    0
}

extern "C" fn write_entry<
    const RC: usize,
    const NR: usize,
    const QC: usize,
    const BS: usize,
    const NB: usize,
>(
    arg: usize,
) -> usize {
    let logger = unsafe { &*(arg as *const Logger<RC, NR, QC, BS, NB>) };
    logger.write_loop();
    0
}

extern "C" fn stats_entry<
    const RC: usize,
    const NR: usize,
    const QC: usize,
    const BS: usize,
    const NB: usize,
>(
    arg: usize,
) -> usize {
    let logger = unsafe { &*(arg as *const Logger<RC, NR, QC, BS, NB>) };
    logger.stats_loop();
    0
}

/// The instantiation scenario §8.2 exercises: 30-byte records, a 128-deep
/// pool, four 4096-byte buffers.
pub type DemoLogger = Logger<30, 128, 128, 4096, 4>;

pub static LOGGER: DemoLogger = Logger::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_record_rejected_before_taking_a_slot() {
        let logger: Logger<4, 4, 4, 16, 2> = Logger::new();
        for idx in 0..4 {
            logger.empty_records.irq_try_put(idx);
        }
        logger.running.store(true, Ordering::SeqCst);
        let res = logger.log(&[1, 2, 3, 4, 5]);
        assert_eq!(res, LogResult::TooLarge);
        // the slot was never taken
        assert!(!logger.empty_records.is_full());
        assert_eq!(logger.empty_records.irq_try_get().is_some(), true);
    }

    #[test]
    fn log_before_start_is_ignored() {
        let logger: Logger<4, 4, 4, 16, 2> = Logger::new();
        assert_eq!(logger.log(&[1]), LogResult::Ignored);
    }

    #[test]
    fn dropped_when_pool_exhausted() {
        let logger: Logger<4, 2, 2, 16, 2> = Logger::new();
        logger.empty_records.irq_try_put(0);
        logger.empty_records.irq_try_put(1);
        logger.running.store(true, Ordering::SeqCst);
        assert_eq!(logger.log(&[1]), LogResult::Queued);
        assert_eq!(logger.log(&[2]), LogResult::Queued);
        assert_eq!(logger.log(&[3]), LogResult::Dropped);
        let stats = logger.counters.snapshot();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.queued, 2);
    }
}
