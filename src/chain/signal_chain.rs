//! Signal Chain
//!
//! Ordered effect instances between a fixed input and a fixed output node.
//! Every structural mutation ends in a full rebuild of the chain's
//! connections, applied under one graph write lock. Mutators take
//! `&mut self`, so a chain is never mutated from two call paths at once.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::descriptor::{EffectDescriptor, EffectInstance, EffectRecord};
use crate::error::{FxError, Result};
use crate::graph::{AudioGraph, Junction, NodeError, NodeId, ProcessingNode, Topology};
use crate::params::ParamBag;
use crate::registry::EffectRegistry;
use crate::services::Services;
use crate::strip::StripId;

/// Result of pushing a parameter value to a live node
#[derive(Debug)]
pub enum ParamOutcome {
    /// Stored and applied to the node
    Applied,
    /// Stored only; the node does not expose this path
    StoredOnly,
    /// Stored, but the node rejected it; re-applied on the next rebuild
    Deferred(FxError),
}

impl ParamOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ParamOutcome::Applied)
    }
}

/// Effect chain owned by one channel strip
pub struct SignalChain {
    owner: StripId,
    graph: AudioGraph,
    registry: Arc<EffectRegistry>,
    services: Services,
    input: NodeId,
    output: NodeId,
    instances: Vec<EffectInstance>,
    released: bool,
}

impl SignalChain {
    /// Create an empty chain with its input wired straight to its output
    pub fn new(
        owner: StripId,
        graph: AudioGraph,
        registry: Arc<EffectRegistry>,
        services: Services,
    ) -> Self {
        let input = graph.add_node(Box::new(Junction::new(format!("{}:in", owner))));
        let output = graph.add_node(Box::new(Junction::new(format!("{}:out", owner))));
        let chain = Self {
            owner,
            graph,
            registry,
            services,
            input,
            output,
            instances: Vec::new(),
            released: false,
        };
        chain.rebuild_connections();
        chain
    }

    // ========================================================================
    // Structural mutations
    // ========================================================================

    /// Append an effect; `params` defaults to the schema defaults
    ///
    /// Returns the new effect id. Unknown types and construction failures
    /// leave the chain untouched.
    pub fn add_effect(&mut self, effect_type: &str, params: Option<ParamBag>) -> Result<String> {
        let index = self.instances.len();
        self.insert_effect(index, effect_type, params)
    }

    /// Insert an effect at `index` (clamped to the chain length)
    pub fn insert_effect(
        &mut self,
        index: usize,
        effect_type: &str,
        params: Option<ParamBag>,
    ) -> Result<String> {
        let instance = self.instantiate(effect_type, params)?;
        let id = instance.descriptor.id.clone();
        let index = index.min(self.instances.len());
        self.instances.insert(index, instance);
        self.rebuild_connections();

        info!("{}: added {} at {}", self.owner, id, index);
        self.services
            .chain_changed(self.owner, &format!("Add {}", effect_type));
        Ok(id)
    }

    /// Remove an effect and release its node
    pub fn remove_effect(&mut self, id: &str) -> Result<EffectDescriptor> {
        let index = self.require_index(id)?;
        let instance = self.instances.remove(index);
        let released = self.release_nodes(&[instance.node]);
        drop(released);

        info!("{}: removed {}", self.owner, id);
        self.services.chain_changed(
            self.owner,
            &format!("Remove {}", instance.descriptor.effect_type),
        );
        Ok(instance.descriptor)
    }

    /// Move the effect at `from` to `to`
    ///
    /// `from == to` changes nothing but still notifies, matching a drag
    /// that is released where it started.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.instances.len();
        for index in [from, to] {
            if index >= len {
                return Err(FxError::IndexOutOfRange { index, len });
            }
        }

        if from != to {
            let instance = self.instances.remove(from);
            self.instances.insert(to, instance);
        }
        self.rebuild_connections();

        debug!("{}: moved effect {} -> {}", self.owner, from, to);
        self.services.chain_changed(self.owner, "Reorder effects");
        Ok(())
    }

    /// Copy an effect (type and params) right after the original
    pub fn duplicate_effect(&mut self, id: &str) -> Result<String> {
        let index = self.require_index(id)?;
        let source = self.instances[index].descriptor.clone();
        self.insert_effect(index + 1, &source.effect_type, Some(source.params))
    }

    /// Replace the whole chain with `records`
    ///
    /// Records with unknown types or rejected params are skipped with a
    /// warning; the ids of skipped records' types are returned.
    pub fn load(&mut self, records: &[EffectRecord]) -> Vec<String> {
        let _guard = self.services.begin_load();
        self.dispose();

        let mut skipped = Vec::new();
        for record in records {
            if let Err(e) = self.add_effect(&record.effect_type, Some(record.params.clone())) {
                warn!(
                    "{}: skipping '{}' while loading: {}",
                    self.owner, record.effect_type, e
                );
                skipped.push(record.effect_type.clone());
            }
        }
        skipped
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Write a parameter into the descriptor, then push it to the live node
    ///
    /// The descriptor is updated even when the node rejects the value. A
    /// path nested below a declared parameter is refused and nothing is
    /// stored. No undo checkpoint is requested; callers checkpoint at
    /// interaction end.
    pub fn update_param(&mut self, id: &str, path: &str, value: Value) -> Result<ParamOutcome> {
        let index = self.require_index(id)?;
        let instance = &mut self.instances[index];

        let effect_type = &instance.descriptor.effect_type;
        if let Some(leaf) = self.registry.shadowed_leaf(effect_type, path) {
            warn!("{}: refusing '{}' on {}: '{}' is a parameter", self.owner, path, id, leaf);
            return Err(FxError::ParamPathConflict {
                effect_id: id.to_string(),
                path: path.to_string(),
                leaf: leaf.to_string(),
            });
        }
        instance.descriptor.params.set(path, value.clone());

        let applied = self
            .graph
            .with_node_mut(instance.node, |node| node.apply_param(path, &value));

        let outcome = match applied {
            Some(Ok(())) => ParamOutcome::Applied,
            Some(Err(NodeError::UnknownParam { .. })) => {
                debug!("{}: '{}' stored without a live target on {}", self.owner, path, id);
                ParamOutcome::StoredOnly
            }
            Some(Err(e)) => self.deferred(id, path, e.to_string()),
            None => self.deferred(id, path, "node is not in the graph".to_string()),
        };
        Ok(outcome)
    }

    fn deferred(&self, id: &str, path: &str, cause: String) -> ParamOutcome {
        let error = FxError::NodeApply {
            effect_id: id.to_string(),
            path: path.to_string(),
            cause,
        };
        warn!("{}: {}", self.owner, error);
        ParamOutcome::Deferred(error)
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Relink input -> effects in order -> output
    ///
    /// Every outgoing edge owned by the chain is cleared before relinking,
    /// so no node is ever connected to two successors. Idempotent.
    pub fn rebuild_connections(&self) {
        let nodes = self.node_order();
        let (input, output) = (self.input, self.output);
        self.graph
            .rewire(|topology| relink(topology, input, &nodes, output));
        debug!("{}: rebuilt chain of {} effects", self.owner, nodes.len());
    }

    /// Release every effect node and wire input straight to output
    pub fn dispose(&mut self) {
        let removed: Vec<NodeId> = self.instances.drain(..).map(|i| i.node).collect();
        let released = self.release_nodes(&removed);
        drop(released);
    }

    /// Drop `removed` from the graph and relink the remaining instances,
    /// all under one write lock
    ///
    /// The released nodes are handed back so they are freed after the lock
    /// is gone.
    fn release_nodes(&self, removed: &[NodeId]) -> Vec<Box<dyn ProcessingNode>> {
        let nodes = self.node_order();
        let (input, output) = (self.input, self.output);
        let released = self.graph.rewire(|topology| {
            let released = removed.iter().filter_map(|&node| topology.remove(node)).collect();
            relink(topology, input, &nodes, output);
            released
        });
        debug!("{}: rebuilt chain of {} effects", self.owner, nodes.len());
        released
    }

    fn node_order(&self) -> Vec<NodeId> {
        self.instances.iter().map(|i| i.node).collect()
    }

    /// Release the chain's fixed nodes as well; used when the owner goes away
    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.dispose();
        self.graph.remove_node(self.input);
        self.graph.remove_node(self.output);
        self.released = true;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Descriptors in current order
    pub fn serialize(&self) -> Vec<EffectDescriptor> {
        self.instances.iter().map(|i| i.descriptor.clone()).collect()
    }

    /// Project-file records in current order
    pub fn to_records(&self) -> Vec<EffectRecord> {
        self.instances
            .iter()
            .map(|i| i.descriptor.to_record())
            .collect()
    }

    pub fn descriptor(&self, id: &str) -> Option<&EffectDescriptor> {
        self.instances
            .iter()
            .find(|i| i.descriptor.id == id)
            .map(|i| &i.descriptor)
    }

    pub fn instances(&self) -> &[EffectInstance] {
        &self.instances
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.descriptor.id == id)
    }

    pub fn effect_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|i| i.descriptor.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn owner(&self) -> StripId {
        self.owner
    }

    /// Fixed input node (where the source connects)
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// Fixed output node
    pub fn output(&self) -> NodeId {
        self.output
    }

    /// Live walk from input to output, or `None` if the wiring is broken
    pub fn topology(&self) -> Option<Vec<NodeId>> {
        self.graph.walk(self.input, self.output)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn instantiate(&self, effect_type: &str, params: Option<ParamBag>) -> Result<EffectInstance> {
        let params = match params {
            Some(params) => self.registry.materialize(effect_type, &params)?,
            None => self.registry.get_default_params(effect_type)?,
        };
        let node = self.registry.create_processing_node(effect_type, &params)?;
        let id = self.generate_id(effect_type);

        Ok(EffectInstance {
            descriptor: EffectDescriptor {
                id,
                effect_type: effect_type.to_string(),
                params,
            },
            node: self.graph.add_node(node),
        })
    }

    fn require_index(&self, id: &str) -> Result<usize> {
        self.index_of(id).ok_or_else(|| {
            warn!("{}: no effect '{}' (stale id?)", self.owner, id);
            FxError::EffectNotFound {
                effect_id: id.to_string(),
            }
        })
    }

    /// Generate a unique id for a new effect of the given type
    fn generate_id(&self, effect_type: &str) -> String {
        let prefix = effect_type.to_lowercase();
        let mut counter = 1;
        loop {
            let id = format!("{}-{}", prefix, counter);
            if self.index_of(&id).is_none() {
                return id;
            }
            counter += 1;
        }
    }
}

fn relink(topology: &mut Topology, input: NodeId, nodes: &[NodeId], output: NodeId) {
    topology.disconnect_outputs(input);
    for &node in nodes {
        topology.disconnect_outputs(node);
    }

    let mut previous = input;
    for &node in nodes {
        topology.connect(previous, node);
        previous = node;
    }
    topology.connect(previous, output);
}

impl Drop for SignalChain {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChain")
            .field("owner", &self.owner)
            .field("effects", &self.effect_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ActionLog, Detached};
    use serde_json::json;

    fn chain_with_log() -> (SignalChain, Arc<ActionLog>, AudioGraph) {
        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let services = Services::new(log.clone(), Arc::new(Detached));
        let chain = SignalChain::new(
            StripId::Track(0),
            graph.clone(),
            Arc::new(EffectRegistry::default()),
            services,
        );
        (chain, log, graph)
    }

    fn walk_ids(chain: &SignalChain) -> Vec<String> {
        let path = chain.topology().expect("chain wiring is a simple path");
        path[1..path.len() - 1]
            .iter()
            .map(|node| {
                chain
                    .instances()
                    .iter()
                    .find(|i| i.node() == *node)
                    .map(|i| i.id().to_string())
                    .expect("walk visits only chain nodes")
            })
            .collect()
    }

    #[test]
    fn test_new_chain_is_wired_through() {
        let (chain, _, graph) = chain_with_log();
        assert!(chain.is_empty());
        assert_eq!(graph.outputs(chain.input()), vec![chain.output()]);
    }

    #[test]
    fn test_add_and_remove() {
        let (mut chain, log, graph) = chain_with_log();
        let registry = EffectRegistry::default();

        let id = chain.add_effect("Reverb", None).unwrap();
        assert_eq!(id, "reverb-1");
        assert_eq!(chain.len(), 1);
        assert_eq!(
            chain.serialize()[0].params,
            registry.get_default_params("Reverb").unwrap()
        );

        let removed = chain.remove_effect(&id).unwrap();
        assert_eq!(removed.effect_type, "Reverb");
        assert!(chain.is_empty());
        assert_eq!(graph.outputs(chain.input()), vec![chain.output()]);
        assert_eq!(log.labels(), vec!["Add Reverb", "Remove Reverb"]);
    }

    #[test]
    fn test_unknown_type_leaves_chain_untouched() {
        let (mut chain, log, graph) = chain_with_log();
        let nodes_before = graph.node_count();

        let err = chain.add_effect("NotARealEffect", None).unwrap_err();
        assert!(matches!(err, FxError::UnknownEffectType { .. }));
        assert!(chain.is_empty());
        assert_eq!(graph.node_count(), nodes_before);
        assert!(log.is_empty());
    }

    fn refusing_factory(
        _params: &ParamBag,
        _ctx: &crate::registry::NodeContext,
    ) -> std::result::Result<Box<dyn ProcessingNode>, NodeError> {
        Err(NodeError::invalid("engine", "out of voices"))
    }

    #[test]
    fn test_construction_failure_leaves_chain_untouched() {
        let mut registry = EffectRegistry::default();
        let mut schema = registry.get_schema("Delay").unwrap().clone();
        schema.effect_type = "Exhausted";
        schema.factory = refusing_factory;
        registry.register(schema);

        let graph = AudioGraph::new();
        let log = Arc::new(ActionLog::default());
        let mut chain = SignalChain::new(
            StripId::Track(0),
            graph.clone(),
            Arc::new(registry),
            Services::new(log.clone(), Arc::new(Detached)),
        );
        let nodes_before = graph.node_count();

        let err = chain.add_effect("Exhausted", None).unwrap_err();
        assert!(matches!(err, FxError::Construction { .. }));
        assert!(chain.is_empty());
        assert_eq!(graph.node_count(), nodes_before);
        assert!(log.is_empty());
    }

    #[test]
    fn test_unusable_explicit_params_fall_back_to_defaults() {
        let (mut chain, _, _) = chain_with_log();
        let params = ParamBag::from(json!({"time": "forever", "wet": 0.9}));

        let id = chain.add_effect("Delay", Some(params)).unwrap();
        let descriptor = chain.descriptor(&id).unwrap();
        assert_eq!(descriptor.params.get_f64("time"), Some(250.0));
        assert_eq!(descriptor.params.get_f64("wet"), Some(0.9));
    }

    #[test]
    fn test_reorder() {
        let (mut chain, _, _) = chain_with_log();
        let a = chain.add_effect("Filter", None).unwrap();
        let b = chain.add_effect("Delay", None).unwrap();
        let c = chain.add_effect("Reverb", None).unwrap();

        chain.reorder(0, 2).unwrap();
        assert_eq!(chain.effect_ids(), vec![b.clone(), c.clone(), a.clone()]);
        assert_eq!(walk_ids(&chain), vec![b, c, a]);
    }

    #[test]
    fn test_reorder_same_index_still_notifies() {
        let (mut chain, log, _) = chain_with_log();
        chain.add_effect("Filter", None).unwrap();
        log.clear();

        chain.reorder(0, 0).unwrap();
        assert_eq!(log.labels(), vec!["Reorder effects"]);
    }

    #[test]
    fn test_reorder_out_of_range() {
        let (mut chain, _, _) = chain_with_log();
        chain.add_effect("Filter", None).unwrap();

        let err = chain.reorder(0, 3).unwrap_err();
        assert!(matches!(err, FxError::IndexOutOfRange { index: 3, len: 1 }));
    }

    #[test]
    fn test_remove_stale_id() {
        let (mut chain, _, _) = chain_with_log();
        let err = chain.remove_effect("delay-9").unwrap_err();
        assert_eq!(err.error_code(), "EFFECT_NOT_FOUND");

        let err = chain.update_param("delay-9", "time", json!(10.0)).unwrap_err();
        assert_eq!(err.error_code(), "EFFECT_NOT_FOUND");
    }

    #[test]
    fn test_update_param_nested() {
        let (mut chain, log, _) = chain_with_log();
        let id = chain.add_effect("Filter", None).unwrap();
        log.clear();

        let outcome = chain
            .update_param(&id, "filter.frequency", json!(440.0))
            .unwrap();
        assert!(outcome.is_applied());
        assert_eq!(
            chain.descriptor(&id).unwrap().params.get_f64("filter.frequency"),
            Some(440.0)
        );
        // parameter ticks never checkpoint
        assert!(log.is_empty());
    }

    #[test]
    fn test_update_param_unknown_path_is_stored() {
        let (mut chain, _, _) = chain_with_log();
        let id = chain.add_effect("Reverb", None).unwrap();

        let outcome = chain.update_param(&id, "early.size", json!(0.8)).unwrap();
        assert!(matches!(outcome, ParamOutcome::StoredOnly));
        assert_eq!(
            chain.descriptor(&id).unwrap().params.get_f64("early.size"),
            Some(0.8)
        );
    }

    #[test]
    fn test_update_param_rejected_keeps_descriptor() {
        let (mut chain, _, _) = chain_with_log();
        let id = chain.add_effect("Reverb", None).unwrap();

        let outcome = chain.update_param(&id, "decay", json!("long")).unwrap();
        match outcome {
            ParamOutcome::Deferred(err) => assert_eq!(err.error_code(), "NODE_APPLY_FAILURE"),
            other => panic!("expected deferred outcome, got {:?}", other),
        }
        assert_eq!(
            chain.descriptor(&id).unwrap().params.get("decay"),
            Some(&json!("long"))
        );
    }

    #[test]
    fn test_update_param_below_declared_leaf_is_refused() {
        let (mut chain, _, _) = chain_with_log();
        let id = chain.add_effect("Filter", None).unwrap();

        let err = chain
            .update_param(&id, "filter.frequency.fine", json!(3.0))
            .unwrap_err();
        assert_eq!(err.error_code(), "PARAM_PATH_CONFLICT");
        assert_eq!(
            chain.descriptor(&id).unwrap().params.get_f64("filter.frequency"),
            Some(1000.0)
        );
    }

    #[test]
    fn test_rejected_value_still_reloads() {
        let (mut chain, _, _) = chain_with_log();
        let id = chain.add_effect("Reverb", None).unwrap();
        chain.update_param(&id, "wet", json!(0.8)).unwrap();
        chain.update_param(&id, "decay", json!("long")).unwrap();

        let records = chain.to_records();
        let skipped = chain.load(&records);
        assert!(skipped.is_empty());
        assert_eq!(chain.len(), 1);

        let params = &chain.serialize()[0].params;
        assert_eq!(params.get_f64("decay"), Some(1.5));
        assert_eq!(params.get_f64("wet"), Some(0.8));
    }

    #[test]
    fn test_remove_relinks_in_same_edit() {
        let (mut chain, _, graph) = chain_with_log();
        let first = chain.add_effect("Filter", None).unwrap();
        let second = chain.add_effect("Delay", None).unwrap();
        let third = chain.add_effect("Gain", None).unwrap();
        let first_node = chain.instances()[0].node();
        let third_node = chain.instances()[2].node();

        chain.remove_effect(&second).unwrap();
        assert_eq!(graph.outputs(first_node), vec![third_node]);
        assert_eq!(walk_ids(&chain), vec![first, third]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (mut chain, _, graph) = chain_with_log();
        chain.add_effect("Filter", None).unwrap();
        chain.add_effect("Delay", None).unwrap();

        let before = chain.topology();
        chain.rebuild_connections();
        chain.rebuild_connections();
        assert_eq!(chain.topology(), before);
        for instance in chain.instances() {
            assert_eq!(graph.outputs(instance.node()).len(), 1);
            assert_eq!(graph.incoming_count(instance.node()), 1);
        }
    }

    #[test]
    fn test_duplicate_effect() {
        let (mut chain, _, _) = chain_with_log();
        let first = chain.add_effect("Delay", None).unwrap();
        chain.add_effect("Reverb", None).unwrap();
        chain.update_param(&first, "time", json!(500.0)).unwrap();

        let copy = chain.duplicate_effect(&first).unwrap();
        assert_eq!(copy, "delay-2");
        assert_eq!(chain.index_of(&copy), Some(1));
        assert_eq!(
            chain.descriptor(&copy).unwrap().params.get_f64("time"),
            Some(500.0)
        );
    }

    #[test]
    fn test_load_skips_unknown_and_suppresses_undo() {
        let (mut chain, log, _) = chain_with_log();
        chain.add_effect("Gain", None).unwrap();
        log.clear();

        let records = vec![
            EffectRecord::new("Filter", ParamBag::from(json!({"filter": {"q": 2.0}}))),
            EffectRecord::new("Vocoder", ParamBag::new()),
            EffectRecord::new("Delay", ParamBag::new()),
        ];
        let skipped = chain.load(&records);

        assert_eq!(skipped, vec!["Vocoder"]);
        assert_eq!(chain.effect_ids(), vec!["filter-1", "delay-1"]);
        assert_eq!(
            chain.descriptor("filter-1").unwrap().params.get_f64("filter.frequency"),
            Some(1000.0)
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_dispose_wires_input_to_output() {
        let (mut chain, _, graph) = chain_with_log();
        chain.add_effect("Filter", None).unwrap();
        chain.add_effect("Delay", None).unwrap();
        let count = graph.node_count();

        chain.dispose();
        assert!(chain.is_empty());
        assert_eq!(graph.node_count(), count - 2);
        assert_eq!(chain.topology(), Some(vec![chain.input(), chain.output()]));
    }

    #[test]
    fn test_drop_releases_all_nodes() {
        let graph = AudioGraph::new();
        {
            let mut chain = SignalChain::new(
                StripId::Master,
                graph.clone(),
                Arc::new(EffectRegistry::default()),
                Services::detached(),
            );
            chain.add_effect("Reverb", None).unwrap();
            assert_eq!(graph.node_count(), 4);
        }
        assert_eq!(graph.node_count(), 1);
    }
}
