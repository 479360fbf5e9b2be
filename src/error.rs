use thiserror::Error;

/// All errors produced by the H-UDP transport.
///
/// A socket closing out from under a worker thread and an ACK arriving for
/// a sequence no longer in the send registry are not represented here: both
/// are handled locally (the worker exits, the ACK is ignored) and never
/// surfaced to a caller.

#[derive(Debug, Error)]
pub enum HudpError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("malformed header: expected at least {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("unknown channel tag: {0}")]
    UnknownChannel(u8),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HudpError>;
