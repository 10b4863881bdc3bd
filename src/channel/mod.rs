//! Closable bounded channels that connect pipeline stages.

pub mod bounded;

pub use bounded::BoundedChannel;

use serde::Serialize;

/// Result of a get: an item, or the end-of-stream marker once the channel is closed and empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    EndOfStream,
}

impl<T> Recv<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Recv::EndOfStream)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Recv::Item(item) => Some(item),
            Recv::EndOfStream => None,
        }
    }
}

/// Point-in-time counters for one channel.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChannelSnapshot {
    pub len: usize,
    /// `None` for an unbounded channel.
    pub capacity: Option<usize>,
    pub in_flight: usize,
    pub closed: bool,
    /// Largest queue length ever observed. Never exceeds `capacity`.
    pub high_water: usize,
    pub total_put: u64,
    pub total_got: u64,
}
