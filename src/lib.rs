//! fxroute - Effect chain and signal graph manager
//!
//! fxroute keeps a declarative list of effect descriptors per channel strip
//! in sync with a live graph of processing nodes.
//!
//! # Architecture
//!
//! - `registry`: effect types, parameter schemas and node factories
//! - `chain`: ordered effect instances between a fixed input and output
//! - `strip`: tracks and the master bus (chain + gain + meter + routing)
//! - `graph`: the shared node graph the render path reads
//! - `metering`: periodic, lock-free meter sampling
//!
//! Structural changes are reported to the surrounding application through
//! the collaborator traits in `services`.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod metering;
pub mod params;
pub mod project;
pub mod registry;
pub mod services;
pub mod strip;

pub use chain::{EffectDescriptor, EffectRecord, ParamOutcome, SignalChain};
pub use config::EngineConfig;
pub use error::{FxError, Result};
pub use params::ParamBag;
pub use project::{ProjectFile, StripRecord};
pub use registry::EffectRegistry;
pub use services::{ActionLog, PresentationService, ProjectService, Services};
pub use strip::{ChannelStrip, Session, StripId};
