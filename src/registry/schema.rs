//! Effect type schemas
//!
//! A schema declares every parameter leaf of an effect type: its dot path,
//! bounds, default and display hints.

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};

use crate::graph::{NodeError, ProcessingNode};
use crate::params::ParamBag;

/// Factory building a live node from a fully materialised parameter bag
pub type NodeFactory = fn(&ParamBag, &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError>;

/// Engine facts a factory may need
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeContext {
    pub sample_rate: f32,
}

/// Unit used to display a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamUnit {
    None,
    Decibels,
    Hertz,
    Milliseconds,
    Seconds,
    Percent,
    Ratio,
}

impl ParamUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            ParamUnit::None => "",
            ParamUnit::Decibels => " dB",
            ParamUnit::Hertz => " Hz",
            ParamUnit::Milliseconds => " ms",
            ParamUnit::Seconds => " s",
            ParamUnit::Percent => " %",
            ParamUnit::Ratio => ":1",
        }
    }
}

/// How a control should map its travel onto the value range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamScale {
    Linear,
    Logarithmic,
}

/// Continuous range or a fixed set of options
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParamKind {
    Continuous {
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    },
    Enumerated {
        options: &'static [&'static str],
        default: &'static str,
    },
}

/// One parameter leaf of an effect type
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    /// Dot path into the effect's parameter bag
    pub key: &'static str,
    /// Human-readable label
    pub label: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub unit: ParamUnit,
    pub scale: ParamScale,
}

impl ParamSpec {
    pub const fn continuous(
        key: &'static str,
        label: &'static str,
        min: f64,
        max: f64,
        step: f64,
        default: f64,
        unit: ParamUnit,
    ) -> Self {
        Self {
            key,
            label,
            kind: ParamKind::Continuous {
                min,
                max,
                step,
                default,
            },
            unit,
            scale: ParamScale::Linear,
        }
    }

    pub const fn enumerated(
        key: &'static str,
        label: &'static str,
        options: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self {
            key,
            label,
            kind: ParamKind::Enumerated { options, default },
            unit: ParamUnit::None,
            scale: ParamScale::Linear,
        }
    }

    /// Same spec with a logarithmic display scale
    pub const fn log_scale(self) -> Self {
        Self {
            scale: ParamScale::Logarithmic,
            ..self
        }
    }

    /// Default value as JSON
    pub fn default_value(&self) -> Value {
        match self.kind {
            ParamKind::Continuous { default, .. } => json!(default),
            ParamKind::Enumerated { default, .. } => json!(default),
        }
    }

    /// Check a stored value against this spec
    ///
    /// Numbers outside the bounds are accepted (factories clamp them);
    /// wrong types, non-finite numbers and unknown options are not.
    pub fn check(&self, value: &Value) -> Result<(), NodeError> {
        match self.kind {
            ParamKind::Continuous { .. } => match value.as_f64() {
                Some(v) if v.is_finite() => Ok(()),
                Some(_) => Err(NodeError::invalid(self.key, "value is not finite")),
                None => Err(NodeError::invalid(
                    self.key,
                    format!("expected number, got {}", value),
                )),
            },
            ParamKind::Enumerated { options, .. } => match value.as_str() {
                Some(choice) if options.contains(&choice) => Ok(()),
                _ => Err(NodeError::invalid(
                    self.key,
                    format!("expected one of {:?}, got {}", options, value),
                )),
            },
        }
    }

    /// Clamp a number into the declared bounds
    pub fn clamp(&self, value: f64) -> f64 {
        match self.kind {
            ParamKind::Continuous { min, max, .. } => value.clamp(min, max),
            ParamKind::Enumerated { .. } => value,
        }
    }

    /// Format a value for display
    pub fn format_value(&self, value: &Value) -> String {
        match (self.kind, value) {
            (ParamKind::Continuous { step, .. }, Value::Number(n)) => {
                let v = n.as_f64().unwrap_or_default();
                let decimals = if step >= 1.0 {
                    0
                } else {
                    (-step.log10()).round() as usize
                };
                format!("{:.*}{}", decimals, v, self.unit.suffix())
            }
            (_, Value::String(s)) => s.clone(),
            _ => value.to_string(),
        }
    }
}

/// Registry entry: parameter schema plus node factory
#[derive(Clone)]
pub struct EffectTypeSchema {
    pub effect_type: &'static str,
    pub display_name: &'static str,
    pub params: Vec<ParamSpec>,
    pub factory: NodeFactory,
}

impl fmt::Debug for EffectTypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectTypeSchema")
            .field("effect_type", &self.effect_type)
            .field("display_name", &self.display_name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl EffectTypeSchema {
    /// Spec for a parameter path
    pub fn param(&self, key: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|spec| spec.key == key)
    }

    /// Bag with every leaf set to its default
    pub fn default_params(&self) -> ParamBag {
        let mut bag = ParamBag::new();
        for spec in &self.params {
            bag.set(spec.key, spec.default_value());
        }
        bag
    }
}
