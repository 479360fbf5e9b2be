use std::net::SocketAddr;

use crate::error::{HudpError, Result};

/// Construction-time configuration for a [`crate::HudpTransport`].
#[derive(Debug, Clone)]
pub struct Config {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    /// Enables epoch snapshot computation on EPOCH arrival.
    pub metric: bool,
    pub retransmission_timeout_ms: u64,
    pub gap_skip_timeout_ms: u64,
}

impl Config {
    pub fn new(local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            peer_addr,
            ..Self::default_with_addrs()
        }
    }

    fn default_with_addrs() -> Self {
        Self {
            local_addr: "0.0.0.0:0".parse().unwrap(),
            peer_addr: "0.0.0.0:0".parse().unwrap(),
            metric: true,
            retransmission_timeout_ms: 50,
            gap_skip_timeout_ms: 200,
        }
    }

    /// Validate the construction-time invariant: `0 < retransmission_timeout_ms
    /// < gap_skip_timeout_ms`. Must be checked before any socket is bound.
    pub fn validate(&self) -> Result<()> {
        if self.retransmission_timeout_ms == 0 {
            return Err(HudpError::InvalidConfig(
                "retransmission_timeout_ms must be > 0".into(),
            ));
        }
        if self.retransmission_timeout_ms >= self.gap_skip_timeout_ms {
            return Err(HudpError::InvalidConfig(format!(
                "retransmission_timeout_ms ({}) must be < gap_skip_timeout_ms ({})",
                self.retransmission_timeout_ms, self.gap_skip_timeout_ms
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_addrs()
    }
}
