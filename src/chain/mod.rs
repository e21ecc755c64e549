//! Effect Chain Module
//!
//! Keeps the declarative list of effect descriptors in sync with the live,
//! connected chain of processing nodes.

mod descriptor;
mod signal_chain;

pub use descriptor::{EffectDescriptor, EffectInstance, EffectRecord};
pub use signal_chain::{ParamOutcome, SignalChain};
