//! Priority queue with FIFO tie-break and async pop
//!
//! Both pool tiers use this queue keyed by a node's disable deadline. The key
//! is computed once when an item is pushed. Items leave in ascending key
//! order; equal keys leave in insertion order via a monotonic sequence
//! number, which is what gives the pool fair rotation.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

struct Entry<T, K> {
    key: K,
    seq: u64,
    item: T,
}

impl<T, K: Ord> PartialEq for Entry<T, K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, K: Ord> Eq for Entry<T, K> {}

impl<T, K: Ord> PartialOrd for Entry<T, K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, K: Ord> Ord for Entry<T, K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct Inner<T, K> {
    heap: BinaryHeap<Reverse<Entry<T, K>>>,
    next_seq: u64,
}

type KeyFn<T, K> = Box<dyn Fn(&T) -> K + Send + Sync>;

/// Ordered container keyed by a caller-supplied projection.
///
/// `try_pop`/`try_push` never wait. `pop` waits until an item arrives;
/// waiters are woken in the order they started waiting.
pub struct PriorityQueue<T, K> {
    inner: Mutex<Inner<T, K>>,
    key: KeyFn<T, K>,
    capacity: Option<usize>,
    available: Notify,
}

impl<T, K: Ord> PriorityQueue<T, K> {
    /// A queue that rejects `try_push` once it holds `capacity` items.
    pub fn bounded(capacity: usize, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::new(Some(capacity), key)
    }

    pub fn unbounded(key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::new(None, key)
    }

    fn new(capacity: Option<usize>, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            key: Box::new(key),
            capacity,
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert unless the queue is at capacity, in which case the item is
    /// handed back.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let key = (self.key)(&item);
        {
            let mut inner = self.lock();
            if self.capacity.is_some_and(|cap| inner.heap.len() >= cap) {
                return Err(item);
            }
            insert(&mut inner, key, item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Insert regardless of capacity.
    pub fn push(&self, item: T) {
        let key = (self.key)(&item);
        insert(&mut self.lock(), key, item);
        self.available.notify_one();
    }

    /// Remove the lowest-keyed item, or `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().heap.pop().map(|Reverse(entry)| entry.item)
    }

    /// Remove the lowest-keyed item, waiting until one is available.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> T {
        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.available.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

fn insert<T, K: Ord>(inner: &mut Inner<T, K>, key: K, item: T) {
    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.heap.push(Reverse(Entry { key, seq, item }));
}
