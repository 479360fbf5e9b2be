//! H-UDP: a hybrid datagram transport that multiplexes a reliable, in-order
//! channel with timer-driven retransmission and a bounded head-of-line
//! blocking budget, and an unreliable, freshest-wins channel that delivers
//! only monotonically newer datagrams, over a single UDP socket bound to
//! exactly one remote peer.
//!
//! Two internal channels round out the wire protocol: one carries
//! acknowledgements, the other carries an epoch-delimiting session-summary
//! token used to snapshot throughput/latency/jitter/PDR statistics.
//!
//! Construct a [`HudpTransport`] from a [`Config`], call [`HudpTransport::start`]
//! to launch its worker threads, then use [`HudpTransport::send`] and
//! [`HudpTransport::recv`] from any thread. [`HudpTransport::close`] drains
//! outstanding reliable traffic before tearing the session down.

pub mod config;
pub mod delivery;
pub mod error;
pub mod frame;
pub mod freshness;
pub mod metrics;
pub mod reassembly;
pub mod registry;
pub mod seq;
pub mod session;

pub use config::Config;
pub use delivery::DeliveryItem;
pub use error::{HudpError, Result};
pub use frame::{Channel, Frame};
pub use metrics::{ChannelSnapshot, EpochSnapshot};
pub use seq::Seq;
pub use session::HudpTransport;
