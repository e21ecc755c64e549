//! Processing node trait
//!
//! Every vertex of the audio graph is a boxed `ProcessingNode`. Effects,
//! gain stages, meters and chain junctions all implement it.

use serde_json::Value;
use thiserror::Error;

/// Failure reported by a live node
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("unknown parameter '{path}'")]
    UnknownParam { path: String },

    #[error("invalid value for '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
}

impl NodeError {
    pub fn invalid(path: &str, reason: impl Into<String>) -> Self {
        NodeError::InvalidValue {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A stateful audio processing unit
pub trait ProcessingNode: Send + Sync {
    /// Node kind identifier (effect type for effect nodes)
    fn kind(&self) -> &str;

    /// Process a mono block in place
    fn process(&mut self, block: &mut [f32]);

    /// Push a single parameter value to the live node
    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError>;

    /// Clear internal state (delay lines, envelopes)
    fn reset(&mut self) {}
}

/// Read a finite number from a parameter value
pub(crate) fn number(path: &str, value: &Value) -> Result<f32, NodeError> {
    match value.as_f64() {
        Some(v) if v.is_finite() => Ok(v as f32),
        Some(_) => Err(NodeError::invalid(path, "value is not finite")),
        None => Err(NodeError::invalid(
            path,
            format!("expected number, got {}", value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_parsing() {
        assert_eq!(number("wet", &json!(0.25)), Ok(0.25));
        assert!(matches!(
            number("wet", &json!("loud")),
            Err(NodeError::InvalidValue { .. })
        ));
    }
}
