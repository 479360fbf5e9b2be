//! Freshness filter for the unreliable channel: delivers only datagrams
//! strictly newer (by the half-range rule) than the newest one already
//! delivered, and silently drops stragglers. No acknowledgement is ever
//! emitted for this channel.

use crate::seq::Seq;

pub struct FreshnessFilter {
    newest: Option<Seq>,
}

impl FreshnessFilter {
    pub fn new() -> Self {
        Self { newest: None }
    }

    /// Returns `true` if `seq` should be delivered, updating the watermark
    /// as a side effect when it does.
    pub fn admit(&mut self, seq: Seq) -> bool {
        match self.newest {
            None => {
                self.newest = Some(seq);
                true
            }
            Some(watermark) => {
                if watermark.is_older_than(seq) {
                    self.newest = Some(seq);
                    true
                } else {
                    tracing::debug!(?seq, ?watermark, "dropping stale unreliable datagram");
                    false
                }
            }
        }
    }

    pub fn watermark(&self) -> Option<Seq> {
        self.newest
    }

    /// Reset on EPOCH arrival so the next epoch starts without an inherited
    /// watermark.
    pub fn reset_for_epoch(&mut self) {
        self.newest = None;
    }
}

impl Default for FreshnessFilter {
    fn default() -> Self {
        Self::new()
    }
}
