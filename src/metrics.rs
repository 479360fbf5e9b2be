//! Per-channel traffic accumulators and the epoch snapshot computed when an
//! EPOCH datagram closes a measurement window.
//!
//! The accumulator fields and the throughput/latency/jitter/PDR formulas
//! below are carried over from the prototype this design was distilled
//! from: the written design names these four statistics without giving
//! formulas, so the original's exact computation is the closest thing to
//! ground truth available. Writing the resulting snapshot to disk (CSV,
//! plots) is out of scope here — this module only produces the numbers.

use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelStats {
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub total_bytes: u64,
    total_latency_ms: f64,
    latency_sq_ms: f64,
}

impl ChannelStats {
    pub fn record_send(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_recv(&mut self, payload_len: usize, latency_ms: f64) {
        self.packets_recv += 1;
        self.total_bytes += payload_len as u64;
        self.total_latency_ms += latency_ms;
        self.latency_sq_ms += latency_ms * latency_ms;
    }

    fn reset(&mut self) {
        *self = ChannelStats::default();
    }
}

/// Accumulators for both channels over the current epoch.
#[derive(Debug, Default)]
pub struct Metrics {
    pub reliable: ChannelStats,
    pub unreliable: ChannelStats,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.reliable.reset();
        self.unreliable.reset();
    }
}

/// Computed statistics for one channel over a closed epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub throughput_bytes_per_sec: f64,
    pub avg_latency_ms: f64,
    pub jitter_ms: f64,
    /// Packet delivery ratio: packets this peer received divided by the
    /// number the other peer reports having sent over the same epoch.
    pub pdr: f64,
}

impl ChannelSnapshot {
    fn compute(stats: &ChannelStats, epoch: Duration, peer_sent: u32) -> Self {
        let secs = epoch.as_secs_f64();
        let recv = stats.packets_recv as f64;

        let throughput_bytes_per_sec = if secs > 0.0 {
            stats.total_bytes as f64 / secs
        } else {
            0.0
        };
        let avg_latency_ms = if recv > 0.0 {
            stats.total_latency_ms / recv
        } else {
            0.0
        };
        let jitter_ms = if recv > 0.0 {
            let mean_sq = stats.latency_sq_ms / recv;
            let variance = (mean_sq - avg_latency_ms * avg_latency_ms).max(0.0);
            variance.sqrt()
        } else {
            0.0
        };
        let pdr = if peer_sent > 0 {
            recv / peer_sent as f64
        } else {
            0.0
        };

        Self {
            throughput_bytes_per_sec,
            avg_latency_ms,
            jitter_ms,
            pdr,
        }
    }
}

/// Statistics snapshot taken when an EPOCH datagram is processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSnapshot {
    pub reliable: ChannelSnapshot,
    pub unreliable: ChannelSnapshot,
}

impl EpochSnapshot {
    pub fn compute(metrics: &Metrics, epoch_duration: Duration, peer_reliable_sent: u32, peer_unreliable_sent: u32) -> Self {
        Self {
            reliable: ChannelSnapshot::compute(&metrics.reliable, epoch_duration, peer_reliable_sent),
            unreliable: ChannelSnapshot::compute(&metrics.unreliable, epoch_duration, peer_unreliable_sent),
        }
    }
}
