//! Effect descriptors
//!
//! The descriptor is the durable truth about a configured effect. Live
//! nodes mirror it and can always be rebuilt from it.

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;
use crate::params::ParamBag;

/// Serializable description of one effect in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    /// Unique within the owning chain (e.g., "reverb-1")
    pub id: String,
    /// Registry type id (e.g., "Reverb")
    #[serde(rename = "type")]
    pub effect_type: String,
    /// Fully materialised parameter bag
    pub params: ParamBag,
}

impl EffectDescriptor {
    /// Persisted form (`{type, params}`)
    pub fn to_record(&self) -> EffectRecord {
        EffectRecord {
            effect_type: self.effect_type.clone(),
            params: self.params.clone(),
        }
    }
}

/// Project-file form of an effect: ids are not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    #[serde(rename = "type")]
    pub effect_type: String,
    #[serde(default)]
    pub params: ParamBag,
}

impl EffectRecord {
    pub fn new(effect_type: impl Into<String>, params: ParamBag) -> Self {
        Self {
            effect_type: effect_type.into(),
            params,
        }
    }
}

/// A descriptor paired with the live node it drives
#[derive(Debug, Clone)]
pub struct EffectInstance {
    pub(crate) descriptor: EffectDescriptor,
    pub(crate) node: NodeId,
}

impl EffectInstance {
    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_format() {
        let descriptor = EffectDescriptor {
            id: "reverb-1".to_string(),
            effect_type: "Reverb".to_string(),
            params: ParamBag::from(json!({"wet": 0.3})),
        };

        let value = serde_json::to_value(descriptor.to_record()).unwrap();
        assert_eq!(value, json!({"type": "Reverb", "params": {"wet": 0.3}}));
    }

    #[test]
    fn test_record_missing_params() {
        let record: EffectRecord = serde_json::from_value(json!({"type": "Delay"})).unwrap();
        assert_eq!(record.effect_type, "Delay");
        assert!(record.params.is_empty());
    }
}
