//! In-flight State Pool
//!
//! A fixed-capacity pool of reusable message-state objects, split into a
//! *free* FIFO and an *in-flight* (used) FIFO. Elements move between the two
//! by value, so an element can never sit in both sets at once.
//!
//! The in-flight FIFO relies on the transport acknowledging sends in the
//! order they were issued: the oldest in-flight element is always the one
//! the next acknowledgment refers to. No per-message correlation map is kept.
//!
//! A single mutex guards both FIFOs, so every operation moves an element
//! between sets atomically. Acquire/append run on the forwarding path while
//! release runs on the broker's acknowledgment thread.

mod ring;

#[cfg(test)]
mod tests;

use std::fmt;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;

pub use ring::RingBuffer;

/// An element that can be recycled instead of dropped.
///
/// `Default` builds a fresh element when the pool grows; `reset` is applied
/// when an element returns to the free set.
pub trait Reusable: Default {
    fn reset(&mut self);
}

/// An element carrying the identity its acknowledgment will report.
pub trait Correlated {
    fn correlation_id(&self) -> u64;
}

/// Pool error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every element is allocated and none is free
    Exhausted { capacity: usize },
    /// More elements were appended than were acquired
    Overflow,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted { capacity } => {
                write!(f, "all {} pool entries are in flight", capacity)
            }
            PoolError::Overflow => write!(f, "in-flight set is full"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Result of matching an acknowledgment against the oldest in-flight entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The oldest entry carried the acknowledged identity
    Matched,
    /// The oldest entries were older than the acknowledged identity.
    ///
    /// Their acknowledgments were lost; they have been released. `found`
    /// reports whether the acknowledged entry itself was then matched.
    Skipped {
        expected: u64,
        skipped: SmallVec<[u64; 4]>,
        found: bool,
    },
    /// The acknowledged identity is older than every in-flight entry
    Duplicate { expected: u64 },
    /// Nothing was in flight
    Unexpected,
}

impl AckOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, AckOutcome::Matched)
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    /// Entries sent and awaiting acknowledgment
    pub in_flight: usize,
    /// Entries ready for reuse
    pub free: usize,
    /// Entries ever created (never exceeds capacity)
    pub allocated: usize,
    /// Entries held by callers between acquire and append/release
    pub checked_out: usize,
    /// Total allocations since creation
    pub allocations: u64,
}

impl PoolStats {
    /// Slots that an `acquire` could still hand out
    pub fn available(&self) -> usize {
        self.capacity - self.in_flight - self.checked_out
    }
}

struct PoolInner<T> {
    used: RingBuffer<T>,
    free: RingBuffer<T>,
    allocated: usize,
    checked_out: usize,
    allocations: u64,
}

/// Fixed-capacity pool of reusable in-flight states
pub struct RingPool<T> {
    inner: Mutex<PoolInner<T>>,
    capacity: usize,
    /// Woken whenever an element returns to the free set
    space: Notify,
}

impl<T: Reusable> RingPool<T> {
    /// Create an empty pool; elements are allocated lazily up to `capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                used: RingBuffer::new(capacity),
                free: RingBuffer::new(capacity),
                allocated: 0,
                checked_out: 0,
                allocations: 0,
            }),
            capacity,
            space: Notify::new(),
        }
    }

    /// Allocate every remaining element up front
    pub fn prefill(&self) {
        let mut inner = self.inner.lock();
        while inner.allocated < self.capacity {
            if inner.free.append(T::default()).is_err() {
                break;
            }
            inner.allocated += 1;
            inner.allocations += 1;
        }
    }

    /// Take an element for sending.
    ///
    /// Reuses a free element when one exists, otherwise allocates while the
    /// pool is below capacity. Fails with [`PoolError::Exhausted`] when every
    /// element is in flight or checked out.
    pub fn acquire(&self) -> Result<T, PoolError> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.free.remove() {
            inner.checked_out += 1;
            return Ok(item);
        }
        if inner.allocated < self.capacity {
            inner.allocated += 1;
            inner.allocations += 1;
            inner.checked_out += 1;
            return Ok(T::default());
        }
        Err(PoolError::Exhausted {
            capacity: self.capacity,
        })
    }

    /// Mark an acquired element as sent and awaiting acknowledgment.
    ///
    /// On [`PoolError::Overflow`] the element goes back to the free set, so
    /// the slot it was acquired for stays usable.
    pub fn append_in_flight(&self, item: T) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        inner.checked_out = inner.checked_out.saturating_sub(1);
        let Err(mut item) = inner.used.append(item) else {
            return Ok(());
        };

        item.reset();
        if inner.free.append(item).is_err() {
            inner.allocated = inner.allocated.saturating_sub(1);
        }
        drop(inner);
        self.space.notify_waiters();
        Err(PoolError::Overflow)
    }

    /// Pop the oldest in-flight element for the caller to validate
    pub fn release_oldest(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.used.remove()?;
        inner.checked_out += 1;
        Some(item)
    }

    /// Return an element to the tail of the free set
    pub fn release(&self, mut item: T) {
        item.reset();
        {
            let mut inner = self.inner.lock();
            inner.checked_out = inner.checked_out.saturating_sub(1);
            if inner.free.append(item).is_err() {
                // Releasing an element this pool never handed out
                inner.allocated = inner.allocated.saturating_sub(1);
            }
        }
        self.space.notify_waiters();
    }

    /// Slots that an `acquire` could still hand out
    pub fn available(&self) -> usize {
        let inner = self.inner.lock();
        self.capacity - inner.used.used() - inner.checked_out
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements awaiting acknowledgment
    pub fn in_flight(&self) -> usize {
        self.inner.lock().used.used()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            capacity: self.capacity,
            in_flight: inner.used.used(),
            free: inner.free.used(),
            allocated: inner.allocated,
            checked_out: inner.checked_out,
            allocations: inner.allocations,
        }
    }

    /// Wait until at least one element is released back to the free set
    pub async fn wait_for_space(&self) {
        let notified = self.space.notified();
        if self.available() > 0 {
            return;
        }
        notified.await;
    }
}

impl<T: Reusable + Correlated> RingPool<T> {
    /// Validate an acknowledgment against the oldest in-flight element and
    /// recycle it.
    ///
    /// Identities are assigned in increasing order, so an acknowledgment for
    /// a newer identity means the older in-flight entries lost theirs; those
    /// are released and reported. An acknowledgment older than every
    /// in-flight entry leaves the pool untouched.
    pub fn acknowledge(&self, id: u64) -> AckOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            let expected = match inner.used.peek_oldest() {
                Some(head) => head.correlation_id(),
                None => return AckOutcome::Unexpected,
            };

            if expected == id {
                inner.recycle_oldest();
                AckOutcome::Matched
            } else if expected > id {
                return AckOutcome::Duplicate { expected };
            } else {
                let mut skipped = SmallVec::new();
                let mut found = false;
                while let Some(head) = inner.used.peek_oldest().map(|h| h.correlation_id()) {
                    if head > id {
                        break;
                    }
                    inner.recycle_oldest();
                    if head == id {
                        found = true;
                        break;
                    }
                    skipped.push(head);
                }
                AckOutcome::Skipped {
                    expected,
                    skipped,
                    found,
                }
            }
        };
        self.space.notify_waiters();
        outcome
    }

    /// Take back the newest in-flight element if it carries `id`.
    ///
    /// Used when a send fails before reaching the broker, so no
    /// acknowledgment will ever arrive for it.
    pub fn retract_newest(&self, id: u64) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.used.peek_newest()?.correlation_id() != id {
            return None;
        }
        let item = inner.used.remove_newest()?;
        inner.checked_out += 1;
        Some(item)
    }
}

impl<T: Reusable> PoolInner<T> {
    fn recycle_oldest(&mut self) {
        if let Some(mut item) = self.used.remove() {
            item.reset();
            // free has room for every allocated element
            let _ = self.free.append(item);
        }
    }
}

impl<T> fmt::Debug for RingPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RingPool")
            .field("capacity", &self.capacity)
            .field("in_flight", &inner.used.used())
            .field("free", &inner.free.used())
            .field("allocated", &inner.allocated)
            .finish()
    }
}
