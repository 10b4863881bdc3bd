//! Fixed-capacity FIFO with blocking put/get, an explicit close signal, and drain-join.
//!
//! One `Mutex` guards the queue, the closed flag and the counters; three condition
//! variables park callers waiting for space, for items, and for the channel to drain.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{ChannelSnapshot, Recv};
use crate::error::ClosedChannel;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Items returned by `get` and not yet acknowledged with `task_done`.
    in_flight: usize,
    high_water: usize,
    total_put: u64,
    total_got: u64,
}

impl<T> Inner<T> {
    fn is_drained(&self) -> bool {
        self.closed && self.items.is_empty() && self.in_flight == 0
    }
}

/// Bounded multi-producer multi-consumer channel shared through `Arc`.
///
/// - `put` blocks while full; fails once the channel is closed.
/// - `get` blocks while empty; yields [`Recv::EndOfStream`] once closed and empty.
/// - Items enqueued before `close` stay consumable.
pub struct BoundedChannel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    capacity: Option<usize>,
}

impl<T> BoundedChannel<T> {
    /// Channel holding at most `capacity` items. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Channel with no capacity bound. `put` never blocks.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        let initial = capacity.unwrap_or(0).min(1024);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(initial),
                closed: false,
                in_flight: 0,
                high_water: 0,
                total_put: 0,
                total_got: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            capacity,
        }
    }

    // No user code runs under the lock, so a poisoned guard still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, cv: &Condvar, guard: MutexGuard<'a, Inner<T>>) -> MutexGuard<'a, Inner<T>> {
        cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on `cv` until `deadline`. Returns `None` once the deadline has passed.
    fn wait_until<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, Inner<T>>,
        deadline: Instant,
    ) -> Option<MutexGuard<'a, Inner<T>>> {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        let (guard, _) = cv
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        Some(guard)
    }

    fn is_full(&self, inner: &Inner<T>) -> bool {
        self.capacity.is_some_and(|c| inner.items.len() >= c)
    }

    /// Append `item`, blocking while the channel is at capacity.
    ///
    /// Fails with the item handed back if the channel is closed when called, or is
    /// closed while this call is waiting for space.
    pub fn put(&self, item: T) -> Result<(), ClosedChannel<T>> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(ClosedChannel(item));
            }
            if !self.is_full(&inner) {
                break;
            }
            inner = self.wait(&self.not_full, inner);
        }
        inner.items.push_back(item);
        inner.total_put += 1;
        inner.high_water = inner.high_water.max(inner.items.len());
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        let item = inner.items.pop_front()?;
        inner.in_flight += 1;
        inner.total_got += 1;
        Some(item)
    }

    /// Take the oldest item, blocking while the channel is empty and open.
    /// Returns [`Recv::EndOfStream`] when the channel is empty and closed.
    pub fn get(&self) -> Recv<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut inner) {
                drop(inner);
                self.not_full.notify_one();
                return Recv::Item(item);
            }
            if inner.closed {
                return Recv::EndOfStream;
            }
            inner = self.wait(&self.not_empty, inner);
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`, returning `None`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Recv<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut inner) {
                drop(inner);
                self.not_full.notify_one();
                return Some(Recv::Item(item));
            }
            if inner.closed {
                return Some(Recv::EndOfStream);
            }
            inner = self.wait_until(&self.not_empty, inner, deadline)?;
        }
    }

    /// Non-blocking get. `None` when the channel is empty but still open.
    pub fn try_get(&self) -> Option<Recv<T>> {
        let mut inner = self.lock();
        if let Some(item) = self.pop_locked(&mut inner) {
            drop(inner);
            self.not_full.notify_one();
            return Some(Recv::Item(item));
        }
        inner.closed.then_some(Recv::EndOfStream)
    }

    /// Acknowledge one item previously returned by a get. Drain-join waits for every
    /// handed-out item to be acknowledged.
    pub fn task_done(&self) {
        let mut inner = self.lock();
        if inner.in_flight == 0 {
            log::warn!("task_done called with no items in flight");
            return;
        }
        inner.in_flight -= 1;
        if inner.is_drained() {
            drop(inner);
            self.drained.notify_all();
        }
    }

    /// Close the channel. Returns `true` for the call that actually closed it.
    ///
    /// Queued items are kept. Blocked getters wake and see `EndOfStream` once the
    /// queue is empty; blocked putters wake and fail.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        let drained = inner.is_drained();
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        if drained {
            self.drained.notify_all();
        }
        true
    }

    /// Block until the channel is closed, empty, and every handed-out item is acknowledged.
    pub fn drain_and_join(&self) {
        self.wait_drained(None);
    }

    /// [`drain_and_join`](Self::drain_and_join) with a bound. Returns `false` on timeout.
    pub fn drain_and_join_timeout(&self, timeout: Duration) -> bool {
        self.wait_drained(Some(Instant::now() + timeout))
    }

    pub(crate) fn wait_drained(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.lock();
        while !inner.is_drained() {
            inner = match deadline {
                None => self.wait(&self.drained, inner),
                Some(d) => match self.wait_until(&self.drained, inner, d) {
                    Some(g) => g,
                    None => return false,
                },
            };
        }
        true
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Consistent view of the channel's counters, taken under the lock.
    pub fn snapshot(&self) -> ChannelSnapshot {
        let inner = self.lock();
        ChannelSnapshot {
            len: inner.items.len(),
            capacity: self.capacity,
            in_flight: inner.in_flight,
            closed: inner.closed,
            high_water: inner.high_water,
            total_put: inner.total_put,
            total_got: inner.total_got,
        }
    }
}
