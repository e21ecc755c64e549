//! Effect Registry
//!
//! Catalog of effect types: parameter schemas plus the factories that turn
//! a parameter bag into a live processing node. The registry is built once
//! at startup and shared read-only (`Arc<EffectRegistry>`) by every chain.

mod effects;
mod schema;

use std::collections::HashMap;

use log::warn;

use crate::error::{FxError, Result};
use crate::graph::ProcessingNode;
use crate::params::ParamBag;

pub use effects::builtin_schemas;
pub use schema::{
    EffectTypeSchema, NodeContext, NodeFactory, ParamKind, ParamScale, ParamSpec, ParamUnit,
};

/// Registry of available effect types
#[derive(Debug)]
pub struct EffectRegistry {
    schemas: HashMap<String, EffectTypeSchema>,
    context: NodeContext,
}

impl EffectRegistry {
    /// Create an empty registry
    pub fn new(sample_rate: u32) -> Self {
        Self {
            schemas: HashMap::new(),
            context: NodeContext {
                sample_rate: sample_rate as f32,
            },
        }
    }

    /// Create a registry holding every built-in effect type
    pub fn with_builtins(sample_rate: u32) -> Self {
        let mut registry = Self::new(sample_rate);
        for schema in builtin_schemas() {
            registry.register(schema);
        }
        registry
    }

    /// Register an effect type, replacing any earlier entry with the same id
    pub fn register(&mut self, schema: EffectTypeSchema) {
        let id = schema.effect_type.to_string();
        if self.schemas.insert(id.clone(), schema).is_some() {
            warn!("Effect type '{}' registered twice; keeping the latest", id);
        }
    }

    /// Look up a schema by effect type id
    pub fn get_schema(&self, effect_type: &str) -> Result<&EffectTypeSchema> {
        self.schemas
            .get(effect_type)
            .ok_or_else(|| FxError::UnknownEffectType {
                effect_type: effect_type.to_string(),
            })
    }

    pub fn has_type(&self, effect_type: &str) -> bool {
        self.schemas.contains_key(effect_type)
    }

    /// All registered type ids, sorted
    pub fn list_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.schemas.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Bag with every schema leaf set to its default
    pub fn get_default_params(&self, effect_type: &str) -> Result<ParamBag> {
        Ok(self.get_schema(effect_type)?.default_params())
    }

    /// Copy of `params` ready for the factory
    ///
    /// Missing schema leaves are filled with their defaults and declared
    /// leaves holding an unusable value (wrong type, unknown option, an
    /// object) are reset to their defaults. Unknown keys are preserved.
    pub fn materialize(&self, effect_type: &str, params: &ParamBag) -> Result<ParamBag> {
        let schema = self.get_schema(effect_type)?;
        let mut bag = params.clone();
        bag.fill_from(&schema.default_params());

        for spec in &schema.params {
            let Some(value) = bag.get(spec.key) else {
                continue;
            };
            if let Err(e) = spec.check(value) {
                warn!("{}: {}; using default {}", effect_type, e, spec.default_value());
                bag.set(spec.key, spec.default_value());
            }
        }
        Ok(bag)
    }

    /// Declared leaf that `path` would nest under, if any
    ///
    /// Writing `filter.frequency.fine` would turn the numeric leaf
    /// `filter.frequency` into an object, so such paths are refused.
    pub fn shadowed_leaf(&self, effect_type: &str, path: &str) -> Option<&'static str> {
        let schema = self.schemas.get(effect_type)?;
        schema
            .params
            .iter()
            .map(|spec| spec.key)
            .find(|key| {
                path.strip_prefix(key)
                    .is_some_and(|rest| rest.starts_with('.'))
            })
    }

    /// Check each declared leaf of `params` without building a node
    pub fn validate_params(&self, effect_type: &str, params: &ParamBag) -> Result<()> {
        let schema = self.get_schema(effect_type)?;
        for spec in &schema.params {
            if let Some(value) = params.get(spec.key) {
                spec.check(value).map_err(|e| FxError::Construction {
                    effect_type: effect_type.to_string(),
                    cause: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Instantiate a live node for `effect_type`
    ///
    /// The bag is materialised before the factory runs. A factory failure
    /// yields `FxError::Construction` and no node.
    pub fn create_processing_node(
        &self,
        effect_type: &str,
        params: &ParamBag,
    ) -> Result<Box<dyn ProcessingNode>> {
        let schema = self.get_schema(effect_type)?;
        let bag = self.materialize(effect_type, params)?;
        (schema.factory)(&bag, &self.context).map_err(|e| FxError::Construction {
            effect_type: effect_type.to_string(),
            cause: e.to_string(),
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.context.sample_rate
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::with_builtins(crate::config::DEFAULT_SAMPLE_RATE)
    }
}
