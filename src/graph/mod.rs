//! Audio Graph Module
//!
//! The live side of the routing layer: processing nodes and the
//! connections that carry audio between them.

mod audio_graph;
mod node;
mod nodes;

pub use audio_graph::{AudioGraph, NodeId, Topology};
pub use node::{NodeError, ProcessingNode};
pub use nodes::{GainStage, Junction, MeterNode, MeterProbe};

pub(crate) use node::number;
