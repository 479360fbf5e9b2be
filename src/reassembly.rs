//! Reassembly buffer: holds out-of-order reliable datagrams and delivers
//! them in sequence, skipping a missing head once it has been open longer
//! than `gap_skip_timeout_ms`.
//!
//! This is the core algorithm of the crate: selective-repeat reception with
//! a bounded head-of-line blocking budget, chosen because the intended
//! traffic (interactive/game state) prefers timely delivery of newer state
//! over perfect ordering of stale state.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::seq::Seq;

/// One item ready for the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub seq: Seq,
    pub origin_ts_ms: u32,
    pub payload: Bytes,
    pub retries_observed: u32,
}

pub struct ReassemblyBuffer {
    expected_seq: Seq,
    buffer: HashMap<Seq, (u32, Bytes)>,
    gap_opened_at: Option<Instant>,
    /// Receiver-local arrival count per sequence, incremented on every
    /// incoming reliable datagram for that seq including duplicates. Read
    /// off at delivery time to report how many times this peer saw the
    /// sequence before it was handed to the application.
    arrivals: HashMap<Seq, u32>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            expected_seq: Seq::ZERO,
            buffer: HashMap::new(),
            gap_opened_at: None,
            arrivals: HashMap::new(),
        }
    }

    pub fn expected_seq(&self) -> Seq {
        self.expected_seq
    }

    /// Handle one arriving reliable datagram, returning everything now
    /// ready for delivery (possibly empty, possibly several items at once).
    pub fn on_arrival(
        &mut self,
        seq: Seq,
        origin_ts_ms: u32,
        payload: Bytes,
        now: Instant,
        gap_skip_timeout_ms: u64,
    ) -> Vec<Delivered> {
        let count = self.arrivals.entry(seq).or_insert(0);
        *count += 1;

        if seq.is_older_than(self.expected_seq) {
            tracing::debug!(?seq, expected = ?self.expected_seq, "dropping late reliable duplicate");
            return Vec::new();
        }
        if self.buffer.contains_key(&seq) {
            tracing::debug!(?seq, "dropping duplicate reliable datagram");
            return Vec::new();
        }

        self.buffer.insert(seq, (origin_ts_ms, payload));
        self.drain(now, gap_skip_timeout_ms)
    }

    fn drain(&mut self, now: Instant, gap_skip_timeout_ms: u64) -> Vec<Delivered> {
        let gap_skip_timeout = std::time::Duration::from_millis(gap_skip_timeout_ms);
        let mut delivered = Vec::new();

        loop {
            if let Some((ts, payload)) = self.buffer.remove(&self.expected_seq) {
                let seq = self.expected_seq;
                let retries_observed = self.arrivals.remove(&seq).map(|c| c - 1).unwrap_or(0);
                delivered.push(Delivered {
                    seq,
                    origin_ts_ms: ts,
                    payload,
                    retries_observed,
                });
                self.gap_opened_at = None;
                self.expected_seq = self.expected_seq.next();
                continue;
            }

            match self.gap_opened_at {
                None => {
                    self.gap_opened_at = Some(now);
                    break;
                }
                Some(opened_at) => {
                    if now.duration_since(opened_at) >= gap_skip_timeout {
                        tracing::warn!(
                            skipped = ?self.expected_seq,
                            open_for_ms = now.duration_since(opened_at).as_millis(),
                            "skipping missing reliable sequence"
                        );
                        self.expected_seq = self.expected_seq.next();
                        self.gap_opened_at = Some(now);
                        continue;
                    }
                    break;
                }
            }
        }

        delivered
    }

    /// Reset receiver-side ordering state. Called when an EPOCH datagram is
    /// processed; the transmit side's own sequence counters are untouched.
    pub fn reset_for_epoch(&mut self) {
        self.expected_seq = Seq::ZERO;
        self.buffer.clear();
        self.gap_opened_at = None;
        self.arrivals.clear();
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload(b: &'static [u8]) -> Bytes {
        Bytes::from_static(b)
    }

    #[test]
    fn in_order_arrival_delivers_immediately() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        let d = buf.on_arrival(Seq(0), 1, payload(b"A"), now, 200);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].seq, Seq(0));
        assert_eq!(buf.expected_seq(), Seq(1));
    }

    #[test]
    fn out_of_order_then_fill_delivers_in_order() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();

        assert!(buf.on_arrival(Seq(2), 3, payload(b"C"), now, 200).is_empty());
        assert!(buf.on_arrival(Seq(1), 2, payload(b"B"), now, 200).is_empty());
        let d = buf.on_arrival(Seq(0), 1, payload(b"A"), now, 200);
        assert_eq!(d.len(), 3);
        assert_eq!(d[0].payload, payload(b"A"));
        assert_eq!(d[1].payload, payload(b"B"));
        assert_eq!(d[2].payload, payload(b"C"));
        assert_eq!(buf.expected_seq(), Seq(3));
    }

    #[test]
    fn duplicate_is_dropped() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        buf.on_arrival(Seq(1), 0, payload(b"B"), now, 200);
        let d = buf.on_arrival(Seq(1), 0, payload(b"B"), now, 200);
        assert!(d.is_empty());
    }

    #[test]
    fn retries_observed_counts_duplicate_arrivals_before_delivery() {
        // Sequence 1 buffers behind a missing head and arrives twice more
        // while it waits; once 0 finally fills the gap, 1's delivered item
        // should report two prior duplicate arrivals.
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();

        let first = buf.on_arrival(Seq(1), 0, payload(b"B"), now, 200);
        assert_eq!(first.len(), 0);
        buf.on_arrival(Seq(1), 0, payload(b"B"), now, 200);
        buf.on_arrival(Seq(1), 0, payload(b"B"), now, 200);

        let d = buf.on_arrival(Seq(0), 0, payload(b"A"), now, 200);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].retries_observed, 0);
        assert_eq!(d[1].seq, Seq(1));
        assert_eq!(d[1].retries_observed, 2);
    }

    #[test]
    fn retries_observed_is_zero_for_a_single_arrival() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        let d = buf.on_arrival(Seq(0), 0, payload(b"A"), now, 200);
        assert_eq!(d[0].retries_observed, 0);
    }

    #[test]
    fn late_arrival_after_expected_has_advanced_is_dropped() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        buf.on_arrival(Seq(0), 0, payload(b"A"), now, 200);
        assert_eq!(buf.expected_seq(), Seq(1));
        let d = buf.on_arrival(Seq(0), 0, payload(b"A"), now, 200);
        assert!(d.is_empty());
    }

    #[test]
    fn gap_skip_after_timeout_delivers_buffered_tail() {
        // Mirrors the head-of-line-skip scenario: 0 arrives and delivers
        // immediately, 1 is permanently missing, 2/3/4 buffer behind it.
        let mut buf = ReassemblyBuffer::new();
        let t0 = Instant::now();

        let d0 = buf.on_arrival(Seq(0), 0, payload(b"0"), t0, 200);
        assert_eq!(d0.len(), 1);
        assert!(buf.on_arrival(Seq(2), 0, payload(b"2"), t0, 200).is_empty());
        assert!(buf.on_arrival(Seq(3), 0, payload(b"3"), t0, 200).is_empty());
        assert!(buf.on_arrival(Seq(4), 0, payload(b"4"), t0, 200).is_empty());

        // A later arrival (any datagram touches the drain loop) after the
        // gap window has elapsed should skip the missing head and flush the
        // buffered tail in one pass, since each skip lands on an already
        // buffered sequence.
        let t1 = t0 + Duration::from_millis(250);
        let d = buf.on_arrival(Seq(5), 0, payload(b"5"), t1, 200);

        assert_eq!(d.iter().map(|x| x.seq).collect::<Vec<_>>(), vec![Seq(2), Seq(3), Seq(4), Seq(5)]);
        assert_eq!(buf.expected_seq(), Seq(6));
    }

    #[test]
    fn sequence_that_was_skipped_is_rejected_if_it_arrives_late() {
        let mut buf = ReassemblyBuffer::new();
        let t0 = Instant::now();
        buf.on_arrival(Seq(0), 0, payload(b"0"), t0, 200);
        buf.on_arrival(Seq(2), 0, payload(b"2"), t0, 200);
        let t1 = t0 + Duration::from_millis(250);
        buf.on_arrival(Seq(3), 0, payload(b"3"), t1, 200); // triggers the skip of seq 1

        let late = buf.on_arrival(Seq(1), 0, payload(b"late"), t1, 200);
        assert!(late.is_empty());
    }

    #[test]
    fn a_gap_that_does_not_land_on_a_buffered_entry_skips_only_one_step() {
        // Nothing is buffered behind the missing head, so a single drain
        // pass advances expected_seq by exactly one and then re-opens a
        // fresh gap timer rather than skipping indefinitely.
        let mut buf = ReassemblyBuffer::new();
        let t0 = Instant::now();
        buf.on_arrival(Seq(5), 0, payload(b"5"), t0, 200);

        let t1 = t0 + Duration::from_millis(250);
        let d = buf.on_arrival(Seq(9), 0, payload(b"9"), t1, 200);
        assert!(d.is_empty());
        assert_eq!(buf.expected_seq(), Seq(1));
    }

    #[test]
    fn delivery_stays_in_order_across_the_wrap_boundary() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        let mut delivered = Vec::new();

        // Walk every sequence from 65533 up through the wrap to 3, in order,
        // with no loss: delivery must never jump backwards.
        for i in 0..10u16 {
            let seq = Seq(65533u16.wrapping_add(i));
            let d = buf.on_arrival(seq, 0, payload(b"x"), now, 200);
            delivered.extend(d.into_iter().map(|item| item.seq));
        }

        let expected: Vec<Seq> = (0..10u16).map(|i| Seq(65533u16.wrapping_add(i))).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn epoch_reset_clears_state() {
        let mut buf = ReassemblyBuffer::new();
        let now = Instant::now();
        buf.on_arrival(Seq(5), 0, payload(b"x"), now, 200);
        buf.reset_for_epoch();
        assert_eq!(buf.expected_seq(), Seq::ZERO);
        let d = buf.on_arrival(Seq(0), 0, payload(b"A"), now, 200);
        assert_eq!(d.len(), 1);
    }
}
