//! Pool Module Tests

use std::sync::Arc;
use std::thread;

use super::*;

#[derive(Debug, Default)]
struct Slot {
    id: u64,
    payload: Vec<u8>,
}

impl Reusable for Slot {
    fn reset(&mut self) {
        self.id = 0;
        self.payload.clear();
    }
}

impl Correlated for Slot {
    fn correlation_id(&self) -> u64 {
        self.id
    }
}

fn send(pool: &RingPool<Slot>, id: u64) {
    let mut slot = pool.acquire().unwrap();
    slot.id = id;
    pool.append_in_flight(slot).unwrap();
}

// =============================================================================
// Acquire / Release
// =============================================================================

#[test]
fn test_lazy_allocation() {
    let pool: RingPool<Slot> = RingPool::new(4);
    assert_eq!(pool.stats().allocated, 0);

    let slot = pool.acquire().unwrap();
    assert_eq!(pool.stats().allocated, 1);
    assert_eq!(pool.stats().checked_out, 1);

    pool.release(slot);
    let stats = pool.stats();
    assert_eq!(stats.free, 1);
    assert_eq!(stats.checked_out, 0);

    // Reuse instead of allocating
    let _slot = pool.acquire().unwrap();
    assert_eq!(pool.stats().allocations, 1);
}

#[test]
fn test_release_resets_element() {
    let pool: RingPool<Slot> = RingPool::new(1);
    let mut slot = pool.acquire().unwrap();
    slot.id = 42;
    slot.payload.extend_from_slice(b"hello");
    pool.release(slot);

    let slot = pool.acquire().unwrap();
    assert_eq!(slot.id, 0);
    assert!(slot.payload.is_empty());
}

#[test]
fn test_capacity_bound() {
    let pool: RingPool<Slot> = RingPool::new(3);
    let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(pool.acquire().unwrap_err(), PoolError::Exhausted { capacity: 3 });
    assert_eq!(pool.available(), 0);

    drop(held);
    // Dropped elements are gone for good; the pool never over-allocates
    assert!(pool.acquire().is_err());
    assert_eq!(pool.stats().allocations, 3);
}

#[test]
fn test_capacity_bound_with_in_flight() {
    let pool: RingPool<Slot> = RingPool::new(2);
    send(&pool, 1);
    send(&pool, 2);
    assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));

    assert!(pool.acknowledge(1).is_matched());
    assert!(pool.acquire().is_ok());
}

#[test]
fn test_prefill() {
    let pool: RingPool<Slot> = RingPool::new(8);
    pool.prefill();
    let stats = pool.stats();
    assert_eq!(stats.allocated, 8);
    assert_eq!(stats.free, 8);
    assert_eq!(stats.in_flight + stats.free, stats.capacity);
}

#[test]
fn test_release_oldest_is_fifo() {
    let pool: RingPool<Slot> = RingPool::new(4);
    for id in 1..=3 {
        send(&pool, id);
    }
    for id in 1..=3 {
        let slot = pool.release_oldest().unwrap();
        assert_eq!(slot.id, id);
        pool.release(slot);
    }
    assert!(pool.release_oldest().is_none());
    assert_eq!(pool.stats().free, 3);
}

#[test]
fn test_overflow_returns_slot_to_free_set() {
    let pool: RingPool<Slot> = RingPool::new(1);
    // An element the pool never handed out fills the only in-flight slot
    pool.append_in_flight(Slot {
        id: 1,
        payload: Vec::new(),
    })
    .unwrap();

    let mut slot = pool.acquire().unwrap();
    slot.id = 2;
    slot.payload.extend_from_slice(b"lost");
    assert_eq!(pool.append_in_flight(slot).unwrap_err(), PoolError::Overflow);
    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.free, 1);

    assert!(pool.acknowledge(1).is_matched());
    assert_eq!(pool.available(), 1);
    let slot = pool.acquire().unwrap();
    assert_eq!(slot.id, 0);
    assert!(slot.payload.is_empty());
    assert_eq!(pool.stats().allocations, 1);
}

// =============================================================================
// Acknowledgment correlation
// =============================================================================

#[test]
fn test_in_order_acks_match() {
    let pool: RingPool<Slot> = RingPool::new(10);
    for id in 100..110 {
        send(&pool, id);
    }
    for id in 100..110 {
        assert_eq!(pool.acknowledge(id), AckOutcome::Matched);
    }
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(pool.stats().free, 10);
}

#[test]
fn test_out_of_order_ack_is_flagged() {
    let pool: RingPool<Slot> = RingPool::new(10);
    send(&pool, 1);
    send(&pool, 2);
    send(&pool, 3);

    // Ack for 2 arrives while 1 is still oldest
    match pool.acknowledge(2) {
        AckOutcome::Skipped {
            expected,
            skipped,
            found,
        } => {
            assert_eq!(expected, 1);
            assert_eq!(skipped.as_slice(), &[1]);
            assert!(found);
        }
        other => panic!("expected Skipped, got {:?}", other),
    }

    // The late ack for 1 is now a duplicate
    assert_eq!(pool.acknowledge(1), AckOutcome::Duplicate { expected: 3 });
    assert_eq!(pool.acknowledge(3), AckOutcome::Matched);
    assert_eq!(pool.acknowledge(4), AckOutcome::Unexpected);
}

#[test]
fn test_ack_beyond_in_flight_drains() {
    let pool: RingPool<Slot> = RingPool::new(4);
    send(&pool, 5);
    send(&pool, 6);

    match pool.acknowledge(9) {
        AckOutcome::Skipped { skipped, found, .. } => {
            assert_eq!(skipped.as_slice(), &[5, 6]);
            assert!(!found);
        }
        other => panic!("expected Skipped, got {:?}", other),
    }
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(pool.stats().free, 2);
}

#[test]
fn test_retract_newest() {
    let pool: RingPool<Slot> = RingPool::new(4);
    send(&pool, 1);
    send(&pool, 2);

    assert!(pool.retract_newest(1).is_none(), "1 is not the tail");
    let slot = pool.retract_newest(2).unwrap();
    assert_eq!(slot.id, 2);
    pool.release(slot);

    assert_eq!(pool.in_flight(), 1);
    assert_eq!(pool.acknowledge(1), AckOutcome::Matched);
}

#[tokio::test]
async fn test_wait_for_space_wakes_on_ack() {
    let pool: Arc<RingPool<Slot>> = Arc::new(RingPool::new(1));
    send(&pool, 1);
    assert_eq!(pool.available(), 0);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.wait_for_space().await })
    };
    tokio::task::yield_now().await;
    pool.acknowledge(1);

    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .expect("waiter not woken")
        .unwrap();
}

#[test]
fn test_wait_for_space_pending_until_release() {
    let pool: RingPool<Slot> = RingPool::new(1);
    send(&pool, 1);

    let mut waiter = tokio_test::task::spawn(pool.wait_for_space());
    tokio_test::assert_pending!(waiter.poll());

    pool.acknowledge(1);
    assert!(waiter.is_woken());
    tokio_test::assert_ready!(waiter.poll());
}

#[test]
fn test_wait_for_space_ready_when_free() {
    let pool: RingPool<Slot> = RingPool::new(2);
    send(&pool, 1);

    let mut waiter = tokio_test::task::spawn(pool.wait_for_space());
    tokio_test::assert_ready!(waiter.poll());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_send_and_ack_preserves_order() {
    const CYCLES: u64 = 50_000;
    let pool: Arc<RingPool<Slot>> = Arc::new(RingPool::new(64));

    let acker = {
        let pool = pool.clone();
        thread::spawn(move || {
            let mut next = 1;
            let mut mismatches = 0;
            while next <= CYCLES {
                if pool.in_flight() == 0 {
                    thread::yield_now();
                    continue;
                }
                if !pool.acknowledge(next).is_matched() {
                    mismatches += 1;
                }
                next += 1;
            }
            mismatches
        })
    };

    let mut id = 1;
    while id <= CYCLES {
        match pool.acquire() {
            Ok(mut slot) => {
                slot.id = id;
                pool.append_in_flight(slot).unwrap();
                id += 1;
            }
            Err(PoolError::Exhausted { .. }) => thread::yield_now(),
            Err(e) => panic!("unexpected pool error: {}", e),
        }
    }

    assert_eq!(acker.join().unwrap(), 0);
    let stats = pool.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.free, stats.allocated);
    assert!(stats.allocated <= 64);
}

// =============================================================================
// Property-Based Tests (using proptest)
// =============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Send,
        Ack,
        ReleaseOldest,
        AcquireRelease,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Send),
            Just(Op::Ack),
            Just(Op::ReleaseOldest),
            Just(Op::AcquireRelease)
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_pool_invariant(capacity in 1usize..32, ops in prop::collection::vec(op_strategy(), 0..200)) {
            let pool: RingPool<Slot> = RingPool::new(capacity);
            pool.prefill();
            let mut next_id = 1u64;
            let mut oldest = 1u64;

            for op in ops {
                match op {
                    Op::Send => {
                        if let Ok(mut slot) = pool.acquire() {
                            slot.id = next_id;
                            next_id += 1;
                            pool.append_in_flight(slot).unwrap();
                        } else {
                            prop_assert_eq!(pool.in_flight(), capacity);
                        }
                    }
                    Op::Ack => {
                        if oldest < next_id {
                            prop_assert_eq!(pool.acknowledge(oldest), AckOutcome::Matched);
                            oldest += 1;
                        } else {
                            prop_assert_eq!(pool.acknowledge(oldest), AckOutcome::Unexpected);
                        }
                    }
                    Op::ReleaseOldest => match pool.release_oldest() {
                        Some(slot) => {
                            prop_assert_eq!(slot.id, oldest);
                            pool.release(slot);
                            oldest += 1;
                        }
                        None => prop_assert_eq!(oldest, next_id),
                    },
                    Op::AcquireRelease => {
                        if let Ok(slot) = pool.acquire() {
                            pool.release(slot);
                        }
                    }
                }

                let stats = pool.stats();
                prop_assert_eq!(stats.checked_out, 0);
                prop_assert_eq!(stats.in_flight + stats.free, capacity);
                prop_assert_eq!(stats.in_flight as u64, next_id - oldest);
            }
        }
    }
}
