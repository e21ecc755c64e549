//! Structural nodes used by every channel strip
//!
//! - `Junction`: fixed pass-through input/output of a signal chain
//! - `GainStage`: linear gain with click-free ramping
//! - `MeterNode`: pass-through level sampler feeding a `MeterProbe`

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::node::{number, NodeError, ProcessingNode};

// ============================================================================
// Junction
// ============================================================================

/// Pass-through node marking a fixed point in the graph
#[derive(Debug, Clone, Default)]
pub struct Junction {
    label: String,
}

impl Junction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProcessingNode for Junction {
    fn kind(&self) -> &str {
        &self.label
    }

    fn process(&mut self, _block: &mut [f32]) {}

    fn apply_param(&mut self, path: &str, _value: &Value) -> Result<(), NodeError> {
        Err(NodeError::UnknownParam {
            path: path.to_string(),
        })
    }
}

// ============================================================================
// Gain Stage
// ============================================================================

/// Linear gain that ramps toward its target instead of stepping
#[derive(Debug, Clone)]
pub struct GainStage {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    ramp_samples: usize,
}

impl GainStage {
    /// Create a gain stage at `initial` gain with the given ramp length
    pub fn new(initial: f32, ramp_samples: usize) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_samples: ramp_samples.max(1),
        }
    }

    /// Start ramping toward a new target gain
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        self.remaining = self.ramp_samples;
        self.step = (target - self.current) / self.ramp_samples as f32;
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Whether a ramp is still in progress
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

impl ProcessingNode for GainStage {
    fn kind(&self) -> &str {
        "gain-stage"
    }

    fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            if self.remaining > 0 {
                self.remaining -= 1;
                self.current = if self.remaining == 0 {
                    self.target
                } else {
                    self.current + self.step
                };
            }
            *sample *= self.current;
        }
    }

    fn apply_param(&mut self, path: &str, value: &Value) -> Result<(), NodeError> {
        match path {
            "gain" => {
                let gain = number(path, value)?;
                if gain < 0.0 {
                    return Err(NodeError::invalid(path, "gain must not be negative"));
                }
                self.set_target(gain);
                Ok(())
            }
            _ => Err(NodeError::UnknownParam {
                path: path.to_string(),
            }),
        }
    }

    fn reset(&mut self) {
        self.current = self.target;
        self.remaining = 0;
    }
}

// ============================================================================
// Meter
// ============================================================================

#[derive(Debug, Default)]
struct MeterState {
    rms_bits: AtomicU32,
    peak_bits: AtomicU32,
    ready: AtomicBool,
    disposed: AtomicBool,
}

/// Lock-free read handle onto a meter node's latest levels
///
/// Reading never touches the graph, so the metering loop can sample a strip
/// while its chain is being rebuilt.
#[derive(Debug, Clone, Default)]
pub struct MeterProbe {
    state: Arc<MeterState>,
}

impl MeterProbe {
    /// Latest block RMS, or `None` before the first block or after disposal
    pub fn rms(&self) -> Option<f32> {
        self.read(&self.state.rms_bits)
    }

    /// Latest block peak, or `None` before the first block or after disposal
    pub fn peak(&self) -> Option<f32> {
        self.read(&self.state.peak_bits)
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire) && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    /// Mark the underlying meter as gone; reads return `None` afterwards
    pub fn mark_disposed(&self) {
        self.state.disposed.store(true, Ordering::Release);
    }

    fn read(&self, slot: &AtomicU32) -> Option<f32> {
        if !self.is_ready() {
            return None;
        }
        let value = f32::from_bits(slot.load(Ordering::Relaxed));
        value.is_finite().then_some(value)
    }
}

/// Pass-through node that measures each block it sees
#[derive(Debug, Default)]
pub struct MeterNode {
    probe: MeterProbe,
}

impl MeterNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading this meter from other threads
    pub fn probe(&self) -> MeterProbe {
        self.probe.clone()
    }
}

impl ProcessingNode for MeterNode {
    fn kind(&self) -> &str {
        "meter"
    }

    fn process(&mut self, block: &mut [f32]) {
        if block.is_empty() {
            return;
        }
        let mut sum = 0.0_f32;
        let mut peak = 0.0_f32;
        for &sample in block.iter() {
            sum += sample * sample;
            peak = peak.max(sample.abs());
        }
        let rms = (sum / block.len() as f32).sqrt();

        let state = &self.probe.state;
        state.rms_bits.store(rms.to_bits(), Ordering::Relaxed);
        state.peak_bits.store(peak.to_bits(), Ordering::Relaxed);
        state.ready.store(true, Ordering::Release);
    }

    fn apply_param(&mut self, path: &str, _value: &Value) -> Result<(), NodeError> {
        Err(NodeError::UnknownParam {
            path: path.to_string(),
        })
    }

    fn reset(&mut self) {
        let state = &self.probe.state;
        state.rms_bits.store(0, Ordering::Relaxed);
        state.peak_bits.store(0, Ordering::Relaxed);
    }
}

impl Drop for MeterNode {
    fn drop(&mut self) {
        self.probe.mark_disposed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_gain_stage_ramps() {
        let mut gain = GainStage::new(1.0, 4);
        gain.set_target(0.0);

        let mut block = [1.0_f32; 6];
        gain.process(&mut block);

        assert_relative_eq!(block[0], 0.75);
        assert_relative_eq!(block[1], 0.5);
        assert_relative_eq!(block[2], 0.25);
        assert_relative_eq!(block[3], 0.0);
        assert_relative_eq!(block[5], 0.0);
        assert!(!gain.is_ramping());
    }

    #[test]
    fn test_gain_stage_rejects_negative() {
        let mut gain = GainStage::new(1.0, 8);
        assert!(gain.apply_param("gain", &json!(-1.0)).is_err());
        assert!(gain.apply_param("pan", &json!(0.0)).is_err());
        gain.apply_param("gain", &json!(0.5)).unwrap();
        assert_relative_eq!(gain.target(), 0.5);
    }

    #[test]
    fn test_meter_probe_lifecycle() {
        let mut meter = MeterNode::new();
        let probe = meter.probe();
        assert_eq!(probe.rms(), None);

        let mut block = [0.5_f32, -0.5, 0.5, -0.5];
        meter.process(&mut block);
        assert_relative_eq!(probe.rms().unwrap(), 0.5);
        assert_relative_eq!(probe.peak().unwrap(), 0.5);
        // pass-through
        assert_relative_eq!(block[1], -0.5);

        drop(meter);
        assert!(probe.is_disposed());
        assert_eq!(probe.rms(), None);
    }
}
