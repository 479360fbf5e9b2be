//! Wire framing: an 11-byte header followed by an opaque payload.
//!
//! ```text
//! Offset  Size  Field
//!   0     1     channel tag
//!   1     2     sequence number (u16, big-endian, modular)
//!   3     4     origin timestamp (u32 ms, big-endian, low 32 bits of wall clock)
//!   7     4     CRC-32 of bytes[0..7) ++ payload (IEEE/zlib polynomial)
//!  11     ..    payload
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HudpError, Result};
use crate::seq::Seq;

pub const HEADER_SIZE: usize = 11;

/// The logical discipline a datagram belongs to, carried as the first
/// header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Reliable = 0,
    Unreliable = 1,
    Ack = 2,
    Epoch = 3,
}

impl TryFrom<u8> for Channel {
    type Error = HudpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Channel::Reliable),
            1 => Ok(Channel::Unreliable),
            2 => Ok(Channel::Ack),
            3 => Ok(Channel::Epoch),
            other => Err(HudpError::UnknownChannel(other)),
        }
    }
}

/// A decoded datagram: header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub seq: Seq,
    pub origin_ts_ms: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Build and encode a frame with the current wall-clock timestamp.
    pub fn encode(channel: Channel, seq: Seq, payload: Bytes) -> Bytes {
        Self::encode_at(channel, seq, now_ms_truncated(), payload)
    }

    /// Encode with an explicit timestamp, so callers (and tests) do not have
    /// to depend on wall-clock time to get a deterministic encoding.
    pub fn encode_at(channel: Channel, seq: Seq, origin_ts_ms: u32, payload: Bytes) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(channel as u8);
        buf.put_u16(seq.0);
        buf.put_u32(origin_ts_ms);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        hasher.update(&payload);
        let crc = hasher.finalize();

        buf.put_u32(crc);
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Parse a frame, verifying its CRC-32 before any other field is trusted
    /// to mean anything.
    pub fn decode(mut data: &[u8]) -> Result<Frame> {
        if data.len() < HEADER_SIZE {
            return Err(HudpError::MalformedHeader {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let prefix = &data[0..7];
        let carried_crc = (&data[7..11]).get_u32();
        let payload = &data[HEADER_SIZE..];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(prefix);
        hasher.update(payload);
        let computed_crc = hasher.finalize();

        if computed_crc != carried_crc {
            return Err(HudpError::ChecksumMismatch {
                expected: carried_crc,
                computed: computed_crc,
            });
        }

        let channel_tag = data[0];
        let seq = Seq((&data[1..3]).get_u16());
        let origin_ts_ms = (&data[3..7]).get_u32();
        let channel = Channel::try_from(channel_tag)?;

        data = &data[HEADER_SIZE..];
        Ok(Frame {
            channel,
            seq,
            origin_ts_ms,
            payload: Bytes::copy_from_slice(data),
        })
    }
}

fn now_ms_truncated() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis();
    (millis & 0xFFFF_FFFF) as u32
}
