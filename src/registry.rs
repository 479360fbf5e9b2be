//! The send registry: per-sequence bookkeeping for reliable packets
//! awaiting acknowledgement.
//!
//! Unlike a windowed retransmission scheme with exponential backoff and a
//! retry cap, this registry retries a pending entry on a fixed interval
//! forever — retries stop only when an ACK removes the entry or the session
//! closes. That is a deliberate, narrower policy than a general-purpose
//! congestion-aware retransmission engine would use.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::frame::Channel;
use crate::seq::Seq;

/// State the sender owns for one reliable packet until it is acknowledged.
#[derive(Debug, Clone)]
pub struct Pending {
    pub payload: Bytes,
    /// RELIABLE for ordinary sends, EPOCH for the epoch marker — both are
    /// retried identically, so the registry needs to remember which channel
    /// tag to re-frame with.
    pub channel: Channel,
    pub first_send: Instant,
    pub last_tx: Instant,
    pub retries: u32,
}

/// Map from sequence to [`Pending`] entry. One entry per in-flight reliable
/// sequence (invariant I1).
#[derive(Debug, Default)]
pub struct SendRegistry {
    entries: HashMap<Seq, Pending>,
}

impl SendRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Record a just-sent reliable (or epoch-marker) packet.
    pub fn insert(&mut self, seq: Seq, channel: Channel, payload: Bytes, now: Instant) {
        self.entries.insert(
            seq,
            Pending {
                payload,
                channel,
                first_send: now,
                last_tx: now,
                retries: 0,
            },
        );
    }

    /// Remove the entry for `seq` on ACK arrival, returning the RTT sample if
    /// the entry was present. A miss is not an error: the ACK may be a
    /// duplicate, or for a sequence this peer never sent (see `RegistryMiss`
    /// in the error-handling design — silently ignored).
    pub fn ack(&mut self, seq: Seq, now: Instant) -> Option<std::time::Duration> {
        self.entries.remove(&seq).map(|p| now.duration_since(p.first_send))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sequences whose last transmission is old enough to warrant a resend,
    /// snapshotted under the caller's lock so the retransmit worker can emit
    /// outside it.
    pub fn due_for_retransmit(&self, now: Instant, retransmission_timeout_ms: u64) -> Vec<(Seq, Channel, Bytes)> {
        let timeout = std::time::Duration::from_millis(retransmission_timeout_ms);
        self.entries
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_tx) >= timeout)
            .map(|(seq, p)| (*seq, p.channel, p.payload.clone()))
            .collect()
    }

    /// Bump bookkeeping for a sequence that was just re-emitted, but only if
    /// it is still present — it may have been ACKed concurrently between the
    /// snapshot and this call, and that race is legal: the update is simply
    /// skipped.
    pub fn record_retransmission(&mut self, seq: Seq, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.last_tx = now;
            entry.retries += 1;
        }
    }
}
