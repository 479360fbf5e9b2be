//! Delivery queue: a lock-free single-producer/multi-consumer FIFO of
//! payloads ready to hand to the application.

use bytes::Bytes;
use crossbeam_queue::SegQueue;

use crate::frame::Channel;
use crate::seq::Seq;

/// One item returned from [`crate::HudpTransport::recv`].
///
/// `retries_observed` is a receiver-local count: how many times this peer
/// saw a reliable datagram for this sequence (including duplicates that
/// were dropped) before it was handed to the application. It carries no
/// wire-format information and is always `0` for the unreliable channel,
/// which has no retransmission concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem {
    pub channel: Channel,
    pub seq: Seq,
    pub origin_ts_ms: u32,
    pub payload: Bytes,
    pub recv_ts_ms: u64,
    pub latency_ms: Option<u64>,
    pub retries_observed: u32,
}

/// Maximum number of items opportunistically drained per `recv` call, to
/// amortize the cost of the queue operations across a batch rather than one
/// pop per call.
pub const RECV_DRAIN_CAP: usize = 64;

#[derive(Default)]
pub struct DeliveryQueue {
    queue: SegQueue<DeliveryItem>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, item: DeliveryItem) {
        self.queue.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop at most `RECV_DRAIN_CAP` items, returning as soon as the queue is
    /// empty.
    pub fn drain_batch(&self) -> Vec<DeliveryItem> {
        let mut items = Vec::new();
        while items.len() < RECV_DRAIN_CAP {
            match self.queue.pop() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }
}
