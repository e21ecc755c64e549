//! Channel Strip Module
//!
//! Tracks and the master bus: a signal chain plus gain stage and meter,
//! routed into a downstream strip or the final output.

mod audibility;
mod channel_strip;
mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

pub use audibility::{derive_audibility, is_audible, MuteSolo};
pub use channel_strip::{ChannelStrip, Downstream};
pub use session::Session;

/// Identity of a channel strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripId {
    /// A track, numbered from 0 in creation order
    Track(u32),
    /// The single master bus
    Master,
}

impl StripId {
    pub fn is_master(&self) -> bool {
        matches!(self, StripId::Master)
    }
}

impl fmt::Display for StripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripId::Track(n) => write!(f, "track-{}", n),
            StripId::Master => write!(f, "master"),
        }
    }
}

/// Something a strip can route its output into
pub trait DownstreamSink {
    /// Input node to connect to, or `None` when unavailable
    fn input_node(&self) -> Option<NodeId>;
}
