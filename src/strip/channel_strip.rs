//! Channel Strip
//!
//! Signal flow of one strip:
//!
//! ```text
//! chain.input -> effects... -> chain.output -> gain -> meter -> downstream
//! ```
//!
//! `downstream` is another strip's chain input (tracks feeding the master
//! bus) or the graph's final output.

use std::sync::Arc;

use log::{info, warn};
use serde_json::json;

use super::audibility::{is_audible, MuteSolo};
use super::{DownstreamSink, StripId};
use crate::chain::SignalChain;
use crate::config::EngineConfig;
use crate::graph::{AudioGraph, GainStage, MeterNode, MeterProbe, NodeId};
use crate::metering::normalize_level;
use crate::project::StripRecord;
use crate::registry::EffectRegistry;
use crate::services::Services;

/// Where a strip's output currently goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downstream {
    /// Another strip's chain input
    Bus(NodeId),
    /// The graph's final output
    FinalOutput,
}

/// A track or the master bus
pub struct ChannelStrip {
    id: StripId,
    chain: SignalChain,
    graph: AudioGraph,
    services: Services,
    gain_node: NodeId,
    meter_node: NodeId,
    meter: MeterProbe,
    /// Last explicit (user or project) gain, linear
    gain: f32,
    max_gain: f32,
    meter_floor_db: f32,
    mute_solo: MuteSolo,
    audible: bool,
    downstream: Downstream,
}

impl ChannelStrip {
    /// Create a strip routed to the final output
    pub fn new(
        id: StripId,
        graph: AudioGraph,
        registry: Arc<EffectRegistry>,
        services: Services,
        config: &EngineConfig,
    ) -> Self {
        let chain = SignalChain::new(id, graph.clone(), registry, services.clone());
        let gain_node = graph.add_node(Box::new(GainStage::new(1.0, config.gain_ramp_samples())));
        let meter = MeterNode::new();
        let probe = meter.probe();
        let meter_node = graph.add_node(Box::new(meter));

        let (chain_out, destination) = (chain.output(), graph.destination());
        graph.rewire(|topology| {
            topology.connect(chain_out, gain_node);
            topology.connect(gain_node, meter_node);
            topology.connect(meter_node, destination);
        });

        info!("created strip {}", id);
        Self {
            id,
            chain,
            graph,
            services,
            gain_node,
            meter_node,
            meter: probe,
            gain: 1.0,
            max_gain: config.max_gain,
            meter_floor_db: config.meter_floor_db,
            mute_solo: MuteSolo::default(),
            audible: true,
            downstream: Downstream::FinalOutput,
        }
    }

    pub fn id(&self) -> StripId {
        self.id
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut SignalChain {
        &mut self.chain
    }

    // ========================================================================
    // Gain
    // ========================================================================

    /// Set the strip gain (linear), returning the clamped value applied
    ///
    /// The live gain ramps to the new value. Only user interaction requests
    /// an undo checkpoint.
    pub fn set_gain(&mut self, value: f32, from_user_interaction: bool) -> f32 {
        let clamped = if value.is_finite() {
            value.clamp(0.0, self.max_gain)
        } else {
            warn!("{}: ignoring non-finite gain {}", self.id, value);
            self.gain
        };
        self.gain = clamped;
        self.push_gain();

        if from_user_interaction {
            self.services.checkpoint(self.id, "Set gain");
        }
        clamped
    }

    /// Last explicit gain, independent of mute/solo
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Gain the live stage is ramping toward
    pub fn effective_gain(&self) -> f32 {
        if self.audible {
            self.gain
        } else {
            0.0
        }
    }

    fn push_gain(&self) {
        let target = json!(self.effective_gain());
        match self
            .graph
            .with_node_mut(self.gain_node, |node| node.apply_param("gain", &target))
        {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("{}: gain stage rejected {}: {}", self.id, target, e),
            None => warn!("{}: gain stage missing from graph", self.id),
        }
    }

    // ========================================================================
    // Mute / solo
    // ========================================================================

    pub fn mute_solo(&self) -> MuteSolo {
        self.mute_solo
    }

    pub(crate) fn set_mute_solo(&mut self, state: MuteSolo) {
        self.mute_solo = state;
    }

    /// Recompute audibility and ramp to silence or back to the last gain
    pub fn apply_mute_or_solo(&mut self, any_track_soloed: bool) {
        let audible = is_audible(self.mute_solo, any_track_soloed);
        if audible != self.audible {
            self.audible = audible;
            self.push_gain();
        }
    }

    pub fn is_audible(&self) -> bool {
        self.audible
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route this strip's output into `target`, or the final output when
    /// the target is absent or unavailable
    pub fn connect_downstream(&mut self, target: Option<&dyn DownstreamSink>) {
        let resolved = target
            .and_then(|sink| sink.input_node())
            .filter(|&node| node != self.chain.input() && self.graph.contains(node));

        let (downstream, node) = match resolved {
            Some(node) => (Downstream::Bus(node), node),
            None => (Downstream::FinalOutput, self.graph.destination()),
        };

        let meter_node = self.meter_node;
        self.graph.rewire(|topology| {
            topology.disconnect_outputs(meter_node);
            topology.connect(meter_node, node);
        });
        self.downstream = downstream;
        info!("{} routed to {:?}", self.id, downstream);
    }

    pub fn downstream(&self) -> Downstream {
        self.downstream
    }

    /// Strip input (the chain's fixed input node)
    pub fn input_node(&self) -> NodeId {
        self.chain.input()
    }

    /// Strip output (the meter node feeding downstream)
    pub fn output_node(&self) -> NodeId {
        self.meter_node
    }

    // ========================================================================
    // Metering
    // ========================================================================

    /// Normalised meter level; silent if the meter is not ready or disposed
    pub fn read_meter_level(&self) -> f32 {
        normalize_level(self.meter.rms(), self.meter_floor_db)
    }

    pub fn meter_probe(&self) -> MeterProbe {
        self.meter.clone()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_record(&self) -> StripRecord {
        StripRecord {
            gain: self.gain,
            muted: self.mute_solo.muted,
            soloed: self.mute_solo.soloed,
            effects: self.chain.to_records(),
        }
    }

    /// Restore gain, flags and chain from a record; returns skipped types
    pub fn apply_record(&mut self, record: &StripRecord) -> Vec<String> {
        self.set_gain(record.gain, false);
        self.mute_solo = MuteSolo::new(record.muted, record.soloed);
        self.chain.load(&record.effects)
    }
}

impl DownstreamSink for ChannelStrip {
    fn input_node(&self) -> Option<NodeId> {
        Some(self.chain.input())
    }
}

impl Drop for ChannelStrip {
    fn drop(&mut self) {
        self.chain.release();
        self.graph.remove_node(self.gain_node);
        self.graph.remove_node(self.meter_node);
        info!("released strip {}", self.id);
    }
}

impl std::fmt::Debug for ChannelStrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStrip")
            .field("id", &self.id)
            .field("gain", &self.gain)
            .field("audible", &self.audible)
            .field("downstream", &self.downstream)
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ActionLog, Detached};
    use approx::assert_relative_eq;

    fn strip(id: StripId, graph: &AudioGraph, log: &Arc<ActionLog>) -> ChannelStrip {
        ChannelStrip::new(
            id,
            graph.clone(),
            Arc::new(EffectRegistry::default()),
            Services::new(log.clone(), Arc::new(Detached)),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_new_strip_wiring() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let strip = strip(StripId::Track(0), &graph, &log);

        let path = graph.walk(strip.input_node(), graph.destination()).unwrap();
        // in, out, gain, meter, destination
        assert_eq!(path.len(), 5);
        assert_eq!(strip.downstream(), Downstream::FinalOutput);
    }

    #[test]
    fn test_set_gain_clamps_and_checkpoints() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let mut strip = strip(StripId::Track(0), &graph, &log);

        assert_relative_eq!(strip.set_gain(-1.0, false), 0.0);
        assert_relative_eq!(strip.set_gain(100.0, false), 4.0);
        assert!(log.is_empty());

        assert_relative_eq!(strip.set_gain(0.5, true), 0.5);
        assert_eq!(log.labels(), vec!["Set gain"]);

        assert_relative_eq!(strip.set_gain(f32::NAN, false), 0.5);
    }

    #[test]
    fn test_mute_ramps_to_zero_and_back() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let mut strip = strip(StripId::Track(0), &graph, &log);
        strip.set_gain(0.8, false);

        strip.set_mute_solo(MuteSolo::new(true, false));
        strip.apply_mute_or_solo(false);
        assert!(!strip.is_audible());
        assert_relative_eq!(strip.effective_gain(), 0.0);
        assert_relative_eq!(strip.gain(), 0.8);

        strip.set_mute_solo(MuteSolo::new(false, false));
        strip.apply_mute_or_solo(false);
        assert_relative_eq!(strip.effective_gain(), 0.8);
    }

    #[test]
    fn test_connect_downstream_and_fallback() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let master = strip(StripId::Master, &graph, &log);
        let mut track = strip(StripId::Track(0), &graph, &log);

        track.connect_downstream(Some(&master));
        assert_eq!(track.downstream(), Downstream::Bus(master.input_node()));
        assert_eq!(graph.outputs(track.output_node()), vec![master.input_node()]);

        drop(master);
        track.connect_downstream(None);
        assert_eq!(track.downstream(), Downstream::FinalOutput);
        assert_eq!(graph.outputs(track.output_node()), vec![graph.destination()]);
    }

    /// Sink that reports a fixed input node
    struct FixedSink(Option<NodeId>);

    impl DownstreamSink for FixedSink {
        fn input_node(&self) -> Option<NodeId> {
            self.0
        }
    }

    #[test]
    fn test_unavailable_sink_falls_back_to_final_output() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let master = strip(StripId::Master, &graph, &log);
        let mut track = strip(StripId::Track(0), &graph, &log);

        track.connect_downstream(Some(&master));
        track.connect_downstream(Some(&FixedSink(None)));
        assert_eq!(track.downstream(), Downstream::FinalOutput);
        assert_eq!(graph.outputs(track.output_node()), vec![graph.destination()]);
    }

    #[test]
    fn test_stale_sink_node_falls_back_to_final_output() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let master = strip(StripId::Master, &graph, &log);
        let mut track = strip(StripId::Track(0), &graph, &log);
        let stale = {
            let gone = strip(StripId::Track(1), &graph, &log);
            gone.input_node()
        };
        assert!(!graph.contains(stale));

        track.connect_downstream(Some(&master));
        track.connect_downstream(Some(&FixedSink(Some(stale))));
        assert_eq!(track.downstream(), Downstream::FinalOutput);
        assert_eq!(graph.outputs(track.output_node()), vec![graph.destination()]);

        // its own input would close a loop
        let own_input = FixedSink(Some(track.input_node()));
        track.connect_downstream(Some(&own_input));
        assert_eq!(track.downstream(), Downstream::FinalOutput);
        assert_eq!(graph.outputs(track.output_node()), vec![graph.destination()]);
    }

    #[test]
    fn test_meter_level_before_audio_is_silent() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let strip = strip(StripId::Track(0), &graph, &log);
        assert_eq!(strip.read_meter_level(), 0.0);
    }

    #[test]
    fn test_drop_releases_nodes() {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        {
            let mut strip = strip(StripId::Track(0), &graph, &log);
            strip.chain_mut().add_effect("Delay", None).unwrap();
            assert_eq!(graph.node_count(), 6);
        }
        assert_eq!(graph.node_count(), 1);
    }
}
