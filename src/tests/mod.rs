//! Scenario tests: a handful of tests that assemble several primitives
//! together, rather than exercising one function in isolation the way the
//! `#[cfg(test)]` blocks scattered through `sync`/`sched`/`queue` do.
//!
//! Scenarios that require several threads to actually run concurrently
//! (deadline-miss detection, deep-sleep time continuity) depend on real
//! timer interrupts and a scheduler that has handed off to the idle loop -
//! neither of which exists on the host this binary is unit-tested on, so
//! they aren't attempted here. The four below drive the real algorithms
//! (priority inheritance, wait-queue draining, ring buffer handoff) through
//! their public or test-only seams without requiring a live preemptive
//! scheduler loop.
//!
//! Scenario tests that touch `sched`'s global state serialize on
//! `SCHED_TEST_LOCK` - the scheduler keeps exactly one `static mut Inner`,
//! and the default test harness runs tests on separate OS threads.

use alloc::vec::Vec;
use spin::Mutex;

use crate::queue::fifo::Fifo;
use crate::queue::nbuffer::NBuffer;
use crate::sched;
use crate::sync::condvar::CondVar;
use crate::sync::mutex::RawMutex;
use crate::thread::tcb::{DetachState, ThreadId, ThreadState};

static SCHED_TEST_LOCK: Mutex<()> = Mutex::new(());

extern "C" fn stub_entry(_arg: usize) -> usize {
    0
}

/// Scenario 1: T0 (base 0) locks M2. T1 (base 0) locks M1, then blocks on
/// M2. T2 (base 2) blocks on M1. T0's effective priority should rise to 2
/// (T2's), not stop at 1, since the inheritance must cross both mutexes.
/// T1's effective priority rises to 2 directly from T2.
#[test]
fn scenario_priority_inheritance_transitivity() {
    let _guard = SCHED_TEST_LOCK.lock();
    sched::init(stub_entry);
    let t0 = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, 0, DetachState::Detached);
    let t1 = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, 0, DetachState::Detached);
    let t2 = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, 2, DetachState::Detached);

    let m1 = RawMutex::new(false);
    let m2 = RawMutex::new(false);

    m2.test_set_owner(t0);
    m1.test_set_owner(t1);

    // T1 blocks trying to lock M2, owned by T0.
    m2.test_block_waiter(t1, t0);
    assert_eq!(sched::effective_priority(t0), 0);
    assert_eq!(sched::effective_priority(t1), 0);

    // T2 blocks trying to lock M1, owned by T1. Raising T1 must also raise
    // T0, since T1 is itself blocked on M2.
    m1.test_block_waiter(t2, t1);

    assert_eq!(sched::effective_priority(t1), 2);
    assert_eq!(sched::effective_priority(t0), 2);
}

/// Scenario 3: a producer writes the ASCII sequence 'A'..'A'+35 through a
/// small FIFO in irregular batches of 1..8 items, a consumer drains
/// whatever is available after each batch. The consumer must observe every
/// byte in strict send order and the final count must match what was sent.
#[test]
fn scenario_fifo_multithreaded_handoff() {
    let q: Fifo<u8, 8> = Fifo::new();
    let total = 35u8;
    let mut sent = 0u8;
    let mut received = Vec::new();
    let mut next_byte = b'A';
    let batch_sizes = [3u8, 7, 1, 8, 5, 6, 4, 1];
    let mut batch_idx = 0;

    while sent < total {
        let batch = batch_sizes[batch_idx % batch_sizes.len()].min(total - sent);
        batch_idx += 1;

        let mut put_this_batch = 0;
        while put_this_batch < batch {
            if q.irq_try_put(next_byte) {
                next_byte += 1;
                sent += 1;
                put_this_batch += 1;
            } else {
                break;
            }
        }

        while let Some(b) = q.irq_try_get() {
            received.push(b);
        }
    }
    while let Some(b) = q.irq_try_get() {
        received.push(b);
    }

    assert_eq!(received.len(), total as usize);
    let expected: Vec<u8> = (0..total).map(|i| b'A' + i).collect();
    assert_eq!(received, expected);
}

/// Scenario 4 (adapted): ten iterations, two waiters parked on the same
/// condvar each time. `broadcast` must drain and wake every waiter on each
/// iteration - the invariant the literal scenario's "total counter = 20"
/// is checking, since each of the ten broadcasts waking both threads is
/// what lets each of them increment once per iteration.
#[test]
fn scenario_condvar_broadcast_fairness() {
    let _guard = SCHED_TEST_LOCK.lock();
    sched::init(stub_entry);
    // A third thread impersonates "current" at a priority neither waiter can
    // preempt, so `broadcast`'s internal `sched::wake` never tries to drive
    // a real context switch.
    let observer = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, i32::MAX, DetachState::Detached);
    let w1 = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, 0, DetachState::Detached);
    let w2 = sched::spawn(stub_entry, 0, sched::DEFAULT_STACK_SIZE, 0, DetachState::Detached);
    sched::set_current_for_test(observer);

    let cv = CondVar::new();
    let mut wakes = 0u32;

    for _ in 0..10 {
        sched::set_state_for_test(w1, ThreadState::Waiting);
        sched::set_state_for_test(w2, ThreadState::Waiting);
        cv.test_push_waiter(w1);
        cv.test_push_waiter(w2);
        assert_eq!(cv.waiter_count_for_test(), 2);

        cv.broadcast();

        assert_eq!(cv.waiter_count_for_test(), 0);
        assert_eq!(sched::state_for_test(w1), ThreadState::Ready);
        assert_eq!(sched::state_for_test(w2), ThreadState::Ready);
        wakes += 2;
    }

    assert_eq!(wakes, 20);
}

/// Scenario 5: a producer fills N-Buffer slots with strings of varying
/// length, including an empty one, a consumer drains them one at a time.
/// Each buffer must come back with its exact bytes and length, in order,
/// and the pool must report empty once every buffer has been consumed.
#[test]
fn scenario_nbuffer_handoff_across_irq_boundary() {
    let nb: NBuffer<16, 4> = NBuffer::new();
    let payloads: [&[u8]; 4] = [b"b1c----", b"b2c----x", b"b3c----xx", b""];

    for payload in payloads.iter() {
        let w = nb.get_writable().expect("pool has room for every payload");
        w[..payload.len()].copy_from_slice(payload);
        nb.mark_filled(payload.len());
    }
    assert!(nb.is_full());

    for payload in payloads.iter() {
        let (buf, size) = nb.get_readable().expect("every filled buffer is readable");
        assert_eq!(size, payload.len());
        assert_eq!(buf, *payload);
        nb.mark_emptied();
    }

    assert!(nb.is_empty());
    assert_eq!(nb.get_readable(), None);
}
