//! Built-in effect types
//!
//! Each effect declares its parameter table and a factory. The DSP inside
//! is deliberately compact; the routing layer only relies on the node
//! contract (`process`, `apply_param`, `reset`).

use std::f32::consts::PI;

use serde_json::Value;

use super::schema::{EffectTypeSchema, NodeContext, ParamKind, ParamSpec, ParamUnit};
use crate::graph::{number, NodeError, ProcessingNode};
use crate::params::ParamBag;

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

fn spec<'a>(specs: &'a [ParamSpec], path: &str) -> Result<&'a ParamSpec, NodeError> {
    specs
        .iter()
        .find(|spec| spec.key == path)
        .ok_or_else(|| NodeError::UnknownParam {
            path: path.to_string(),
        })
}

/// Validate and clamp a numeric value against its spec
fn clamped(spec: &ParamSpec, value: &Value) -> Result<f32, NodeError> {
    spec.check(value)?;
    Ok(spec.clamp(f64::from(number(spec.key, value)?)) as f32)
}

/// Read a numeric leaf from a materialised bag
fn read_number(bag: &ParamBag, specs: &[ParamSpec], path: &str) -> Result<f32, NodeError> {
    let spec = spec(specs, path)?;
    let value = bag
        .get(path)
        .ok_or_else(|| NodeError::invalid(path, "missing value"))?;
    clamped(spec, value)
}

/// Read an enumerated leaf from a materialised bag
fn read_choice(bag: &ParamBag, specs: &[ParamSpec], path: &str) -> Result<&'static str, NodeError> {
    let spec = spec(specs, path)?;
    let value = bag
        .get(path)
        .ok_or_else(|| NodeError::invalid(path, "missing value"))?;
    choice(spec, value)
}

fn choice(spec: &ParamSpec, value: &Value) -> Result<&'static str, NodeError> {
    spec.check(value)?;
    match spec.kind {
        ParamKind::Enumerated { options, .. } => options
            .iter()
            .copied()
            .find(|option| Some(*option) == value.as_str())
            .ok_or_else(|| NodeError::invalid(spec.key, "unknown option")),
        ParamKind::Continuous { .. } => Err(NodeError::invalid(spec.key, "not an enumerated parameter")),
    }
}

/// All built-in effect schemas
pub fn builtin_schemas() -> Vec<EffectTypeSchema> {
    vec![
        EffectTypeSchema {
            effect_type: "Reverb",
            display_name: "Reverb",
            params: REVERB_PARAMS.to_vec(),
            factory: Reverb::build,
        },
        EffectTypeSchema {
            effect_type: "Delay",
            display_name: "Delay",
            params: DELAY_PARAMS.to_vec(),
            factory: Delay::build,
        },
        EffectTypeSchema {
            effect_type: "Filter",
            display_name: "Filter",
            params: FILTER_PARAMS.to_vec(),
            factory: Filter::build,
        },
        EffectTypeSchema {
            effect_type: "Compressor",
            display_name: "Compressor",
            params: COMPRESSOR_PARAMS.to_vec(),
            factory: Compressor::build,
        },
        EffectTypeSchema {
            effect_type: "Distortion",
            display_name: "Distortion",
            params: DISTORTION_PARAMS.to_vec(),
            factory: Distortion::build,
        },
        EffectTypeSchema {
            effect_type: "Gain",
            display_name: "Gain",
            params: GAIN_PARAMS.to_vec(),
            factory: Gain::build,
        },
    ]
}

// ============================================================================
// Reverb
// ============================================================================

const REVERB_PARAMS: &[ParamSpec] = &[
    ParamSpec::continuous("decay", "Decay", 0.1, 10.0, 0.1, 1.5, ParamUnit::Seconds),
    ParamSpec::continuous("damping", "Damping", 0.0, 1.0, 0.01, 0.5, ParamUnit::None),
    ParamSpec::continuous("wet", "Mix", 0.0, 1.0, 0.01, 0.3, ParamUnit::None),
];

/// Comb delay lengths in seconds (mutually prime at 48 kHz)
const REVERB_COMBS: [f32; 4] = [0.0297, 0.0371, 0.0411, 0.0437];

struct CombLine {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    filter_state: f32,
}

/// Parallel damped comb reverb
pub struct Reverb {
    combs: Vec<CombLine>,
    sample_rate: f32,
    decay: f32,
    damping: f32,
    wet: f32,
}

impl Reverb {
    fn build(bag: &ParamBag, ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        let combs = REVERB_COMBS
            .iter()
            .map(|seconds| CombLine {
                buffer: vec![0.0; ((seconds * ctx.sample_rate) as usize).max(1)],
                pos: 0,
                feedback: 0.0,
                filter_state: 0.0,
            })
            .collect();
        let mut reverb = Reverb {
            combs,
            sample_rate: ctx.sample_rate,
            decay: read_number(bag, REVERB_PARAMS, "decay")?,
            damping: read_number(bag, REVERB_PARAMS, "damping")?,
            wet: read_number(bag, REVERB_PARAMS, "wet")?,
        };
        reverb.update_feedback();
        Ok(Box::new(reverb))
    }

    /// Feedback giving a 60 dB decay over `decay` seconds
    fn update_feedback(&mut self) {
        for comb in &mut self.combs {
            let delay_secs = comb.buffer.len() as f32 / self.sample_rate;
            comb.feedback = 10.0_f32.powf(-3.0 * delay_secs / self.decay);
        }
    }
}

impl ProcessingNode for Reverb {
    fn kind(&self) -> &str {
        "Reverb"
    }

    fn process(&mut self, block: &mut [f32]) {
        let scale = 1.0 / self.combs.len() as f32;
        for sample in block.iter_mut() {
            let input = *sample;
            let mut acc = 0.0;
            for comb in &mut self.combs {
                let delayed = comb.buffer[comb.pos];
                comb.filter_state = delayed * (1.0 - self.damping) + comb.filter_state * self.damping;
                comb.buffer[comb.pos] = input + comb.filter_state * comb.feedback;
                comb.pos = (comb.pos + 1) % comb.buffer.len();
                acc += delayed;
            }
            *sample = input * (1.0 - self.wet) + acc * scale * self.wet;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let v = clamped(spec(REVERB_PARAMS, path)?, value)?;
        match path {
            "decay" => {
                self.decay = v;
                self.update_feedback();
            }
            "damping" => self.damping = v,
            _ => self.wet = v,
        }
        Ok(())
    }

    fn reset(&mut self) {
        for comb in &mut self.combs {
            comb.buffer.fill(0.0);
            comb.filter_state = 0.0;
            comb.pos = 0;
        }
    }
}

// ============================================================================
// Delay
// ============================================================================

const DELAY_PARAMS: &[ParamSpec] = &[
    ParamSpec::continuous("time", "Time", 1.0, 2000.0, 1.0, 250.0, ParamUnit::Milliseconds),
    ParamSpec::continuous("feedback", "Feedback", 0.0, 0.95, 0.01, 0.35, ParamUnit::None),
    ParamSpec::continuous("wet", "Mix", 0.0, 1.0, 0.01, 0.5, ParamUnit::None),
];

/// Feedback delay line
pub struct Delay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    sample_rate: f32,
    feedback: f32,
    wet: f32,
}

impl Delay {
    fn build(bag: &ParamBag, ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        let max_ms = match DELAY_PARAMS[0].kind {
            ParamKind::Continuous { max, .. } => max as f32,
            ParamKind::Enumerated { .. } => 2000.0,
        };
        let capacity = (max_ms / 1000.0 * ctx.sample_rate) as usize + 1;
        let mut delay = Delay {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            delay_samples: 1,
            sample_rate: ctx.sample_rate,
            feedback: read_number(bag, DELAY_PARAMS, "feedback")?,
            wet: read_number(bag, DELAY_PARAMS, "wet")?,
        };
        delay.set_time(read_number(bag, DELAY_PARAMS, "time")?);
        Ok(Box::new(delay))
    }

    fn set_time(&mut self, ms: f32) {
        let samples = (ms / 1000.0 * self.sample_rate) as usize;
        self.delay_samples = samples.clamp(1, self.buffer.len() - 1);
    }
}

impl ProcessingNode for Delay {
    fn kind(&self) -> &str {
        "Delay"
    }

    fn process(&mut self, block: &mut [f32]) {
        let len = self.buffer.len();
        for sample in block.iter_mut() {
            let read_pos = (self.write_pos + len - self.delay_samples) % len;
            let delayed = self.buffer[read_pos];
            self.buffer[self.write_pos] = *sample + delayed * self.feedback;
            self.write_pos = (self.write_pos + 1) % len;
            *sample = *sample * (1.0 - self.wet) + delayed * self.wet;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let v = clamped(spec(DELAY_PARAMS, path)?, value)?;
        match path {
            "time" => self.set_time(v),
            "feedback" => self.feedback = v,
            _ => self.wet = v,
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

// ============================================================================
// Filter
// ============================================================================

const FILTER_TYPES: &[&str] = &["lowpass", "highpass", "bandpass"];

const FILTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::enumerated("filter.type", "Type", FILTER_TYPES, "lowpass"),
    ParamSpec::continuous("filter.frequency", "Cutoff", 20.0, 20000.0, 1.0, 1000.0, ParamUnit::Hertz)
        .log_scale(),
    ParamSpec::continuous("filter.q", "Resonance", 0.1, 20.0, 0.01, 0.707, ParamUnit::None),
];

/// State-variable filter (trapezoidal integration)
pub struct Filter {
    mode: &'static str,
    frequency: f32,
    q: f32,
    sample_rate: f32,
    g: f32,
    k: f32,
    ic1: f32,
    ic2: f32,
}

impl Filter {
    fn build(bag: &ParamBag, ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        let mut filter = Filter {
            mode: read_choice(bag, FILTER_PARAMS, "filter.type")?,
            frequency: read_number(bag, FILTER_PARAMS, "filter.frequency")?,
            q: read_number(bag, FILTER_PARAMS, "filter.q")?,
            sample_rate: ctx.sample_rate,
            g: 0.0,
            k: 0.0,
            ic1: 0.0,
            ic2: 0.0,
        };
        filter.update_coefficients();
        Ok(Box::new(filter))
    }

    fn update_coefficients(&mut self) {
        let cutoff = self.frequency.min(self.sample_rate * 0.49);
        self.g = (PI * cutoff / self.sample_rate).tan();
        self.k = 1.0 / self.q;
    }
}

impl ProcessingNode for Filter {
    fn kind(&self) -> &str {
        "Filter"
    }

    fn process(&mut self, block: &mut [f32]) {
        let a1 = 1.0 / (1.0 + self.g * (self.g + self.k));
        let a2 = self.g * a1;
        let a3 = self.g * a2;
        for sample in block.iter_mut() {
            let v0 = *sample;
            let v3 = v0 - self.ic2;
            let v1 = a1 * self.ic1 + a2 * v3;
            let v2 = self.ic2 + a2 * self.ic1 + a3 * v3;
            self.ic1 = 2.0 * v1 - self.ic1;
            self.ic2 = 2.0 * v2 - self.ic2;
            *sample = match self.mode {
                "highpass" => v0 - self.k * v1 - v2,
                "bandpass" => v1,
                _ => v2,
            };
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let spec = spec(FILTER_PARAMS, path)?;
        match path {
            "filter.type" => self.mode = choice(spec, value)?,
            "filter.frequency" => self.frequency = clamped(spec, value)?,
            _ => self.q = clamped(spec, value)?,
        }
        self.update_coefficients();
        Ok(())
    }

    fn reset(&mut self) {
        self.ic1 = 0.0;
        self.ic2 = 0.0;
    }
}

// ============================================================================
// Compressor
// ============================================================================

const COMPRESSOR_PARAMS: &[ParamSpec] = &[
    ParamSpec::continuous("threshold", "Threshold", -60.0, 0.0, 0.1, -18.0, ParamUnit::Decibels),
    ParamSpec::continuous("ratio", "Ratio", 1.0, 20.0, 0.1, 4.0, ParamUnit::Ratio),
    ParamSpec::continuous("attack", "Attack", 0.1, 100.0, 0.1, 10.0, ParamUnit::Milliseconds),
    ParamSpec::continuous("release", "Release", 10.0, 1000.0, 1.0, 100.0, ParamUnit::Milliseconds),
    ParamSpec::continuous("makeup", "Makeup", 0.0, 24.0, 0.1, 0.0, ParamUnit::Decibels),
];

/// Peak-detecting feed-forward compressor
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    makeup: f32,
    sample_rate: f32,
    envelope: f32,
}

impl Compressor {
    fn build(bag: &ParamBag, ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        let mut comp = Compressor {
            threshold_db: read_number(bag, COMPRESSOR_PARAMS, "threshold")?,
            ratio: read_number(bag, COMPRESSOR_PARAMS, "ratio")?,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup: db_to_linear(read_number(bag, COMPRESSOR_PARAMS, "makeup")?),
            sample_rate: ctx.sample_rate,
            envelope: 0.0,
        };
        comp.attack_coeff = comp.time_coeff(read_number(bag, COMPRESSOR_PARAMS, "attack")?);
        comp.release_coeff = comp.time_coeff(read_number(bag, COMPRESSOR_PARAMS, "release")?);
        Ok(Box::new(comp))
    }

    fn time_coeff(&self, ms: f32) -> f32 {
        (-1.0 / (ms / 1000.0 * self.sample_rate)).exp()
    }
}

impl ProcessingNode for Compressor {
    fn kind(&self) -> &str {
        "Compressor"
    }

    fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let env_db = 20.0 * self.envelope.max(1e-9).log10();
            let over = env_db - self.threshold_db;
            let gain_db = if over > 0.0 {
                -over * (1.0 - 1.0 / self.ratio)
            } else {
                0.0
            };
            *sample *= db_to_linear(gain_db) * self.makeup;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let v = clamped(spec(COMPRESSOR_PARAMS, path)?, value)?;
        match path {
            "threshold" => self.threshold_db = v,
            "ratio" => self.ratio = v,
            "attack" => self.attack_coeff = self.time_coeff(v),
            "release" => self.release_coeff = self.time_coeff(v),
            _ => self.makeup = db_to_linear(v),
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

// ============================================================================
// Distortion
// ============================================================================

const DISTORTION_PARAMS: &[ParamSpec] = &[
    ParamSpec::continuous("drive", "Drive", 0.0, 1.0, 0.01, 0.5, ParamUnit::None),
    ParamSpec::continuous("wet", "Mix", 0.0, 1.0, 0.01, 1.0, ParamUnit::None),
];

/// Soft-clipping waveshaper
pub struct Distortion {
    drive: f32,
    wet: f32,
}

impl Distortion {
    fn build(bag: &ParamBag, _ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        Ok(Box::new(Distortion {
            drive: read_number(bag, DISTORTION_PARAMS, "drive")?,
            wet: read_number(bag, DISTORTION_PARAMS, "wet")?,
        }))
    }
}

impl ProcessingNode for Distortion {
    fn kind(&self) -> &str {
        "Distortion"
    }

    fn process(&mut self, block: &mut [f32]) {
        let pre = 1.0 + self.drive * 20.0;
        let norm = 1.0 / pre.tanh();
        for sample in block.iter_mut() {
            let shaped = (*sample * pre).tanh() * norm;
            *sample = *sample * (1.0 - self.wet) + shaped * self.wet;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let v = clamped(spec(DISTORTION_PARAMS, path)?, value)?;
        match path {
            "drive" => self.drive = v,
            _ => self.wet = v,
        }
        Ok(())
    }
}

// ============================================================================
// Gain
// ============================================================================

const GAIN_PARAMS: &[ParamSpec] = &[ParamSpec::continuous(
    "gain",
    "Gain",
    -60.0,
    24.0,
    0.1,
    0.0,
    ParamUnit::Decibels,
)];

/// Static gain in decibels
pub struct Gain {
    gain_linear: f32,
}

impl Gain {
    fn build(bag: &ParamBag, _ctx: &NodeContext) -> Result<Box<dyn ProcessingNode>, NodeError> {
        Ok(Box::new(Gain {
            gain_linear: db_to_linear(read_number(bag, GAIN_PARAMS, "gain")?),
        }))
    }
}

impl ProcessingNode for Gain {
    fn kind(&self) -> &str {
        "Gain"
    }

    fn process(&mut self, block: &mut [f32]) {
        // Unity gain optimization
        if (self.gain_linear - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in block.iter_mut() {
            *sample *= self.gain_linear;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        let db = clamped(spec(GAIN_PARAMS, path)?, value)?;
        self.gain_linear = db_to_linear(db);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
