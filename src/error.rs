//! Error handling for fxroute
//!
//! Every error in the routing core is recoverable: the worst outcome is an
//! effect that was not added or a parameter tick that was dropped.

use thiserror::Error;

use crate::strip::StripId;

/// Result type alias for fxroute operations
pub type Result<T> = std::result::Result<T, FxError>;

/// Main error type for fxroute operations
#[derive(Error, Debug)]
pub enum FxError {
    // Registry Errors
    #[error("Unknown effect type: {effect_type}")]
    UnknownEffectType { effect_type: String },

    #[error("Failed to construct '{effect_type}': {cause}")]
    Construction { effect_type: String, cause: String },

    // Chain Errors
    #[error("Effect not found: {effect_id}")]
    EffectNotFound { effect_id: String },

    #[error("Index {index} out of range for chain of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Failed to apply '{path}' to effect '{effect_id}': {cause}")]
    NodeApply {
        effect_id: String,
        path: String,
        cause: String,
    },

    #[error("Cannot write '{path}' on effect '{effect_id}': '{leaf}' is a parameter, not a group")]
    ParamPathConflict {
        effect_id: String,
        path: String,
        leaf: String,
    },

    // Strip Errors
    #[error("Channel strip not found: {strip}")]
    StripNotFound { strip: StripId },

    #[error("Master bus is not available")]
    MasterBusUnavailable,

    // Config / Project Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid project: {reason}")]
    InvalidProject { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl FxError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::UnknownEffectType { .. } => "UNKNOWN_EFFECT_TYPE",
            FxError::Construction { .. } => "CONSTRUCTION_ERROR",
            FxError::EffectNotFound { .. } => "EFFECT_NOT_FOUND",
            FxError::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            FxError::NodeApply { .. } => "NODE_APPLY_FAILURE",
            FxError::ParamPathConflict { .. } => "PARAM_PATH_CONFLICT",
            FxError::StripNotFound { .. } => "STRIP_NOT_FOUND",
            FxError::MasterBusUnavailable => "MASTER_BUS_UNAVAILABLE",
            FxError::InvalidConfig { .. } => "INVALID_CONFIG",
            FxError::InvalidProject { .. } => "INVALID_PROJECT",
            FxError::Io(_) => "IO_ERROR",
            FxError::Serialization(_) => "SERIALIZATION_ERROR",
            FxError::Wav(_) => "WAV_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Graph errors never corrupt the chain, so only configuration and
    /// file-level failures are treated as fatal to the current action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FxError::UnknownEffectType { .. }
            | FxError::Construction { .. }
            | FxError::EffectNotFound { .. }
            | FxError::IndexOutOfRange { .. }
            | FxError::NodeApply { .. }
            | FxError::ParamPathConflict { .. }
            | FxError::StripNotFound { .. }
            | FxError::MasterBusUnavailable => true,
            _ => false,
        }
    }

    /// Whether the error should be surfaced to the user as a notice.
    ///
    /// Parameter-apply failures happen at control rate and are only logged.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, FxError::NodeApply { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            FxError::UnknownEffectType { .. } => vec![
                "Run 'fxroute-cli effects' to list the available effect types",
                "The project may have been saved by a newer version",
            ],
            FxError::Construction { .. } => vec![
                "Check the effect parameters are within their declared bounds",
                "Add the effect with default parameters and adjust afterwards",
            ],
            FxError::EffectNotFound { .. } | FxError::IndexOutOfRange { .. } => {
                vec!["The chain changed since the request was issued; refresh and retry"]
            }
            FxError::NodeApply { .. } => {
                vec!["The stored value is kept and re-applied on the next rebuild"]
            }
            FxError::ParamPathConflict { .. } => {
                vec!["Address the parameter itself, not a path below it"]
            }
            FxError::MasterBusUnavailable => {
                vec!["Tracks are routed straight to the final output until a master bus exists"]
            }
            FxError::InvalidConfig { .. } => vec![
                "Check the configuration file against the documented defaults",
                "Remove the offending key to fall back to its default",
            ],
            FxError::InvalidProject { .. } | FxError::Serialization(_) => vec![
                "The project file may be corrupted - try an earlier save",
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = FxError::UnknownEffectType {
            effect_type: "NotARealEffect".to_string(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_EFFECT_TYPE");
        assert!(err.is_recoverable());
        assert!(err.is_user_visible());
    }

    #[test]
    fn test_node_apply_is_silent() {
        let err = FxError::NodeApply {
            effect_id: "reverb-1".to_string(),
            path: "decay".to_string(),
            cause: "expected number".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_user_visible());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_config_error_not_recoverable() {
        let err = FxError::InvalidConfig {
            reason: "sample_rate must be positive".to_string(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
