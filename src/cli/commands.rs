//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::f32::consts::TAU;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};
use serde_json::Value;

use super::StripTarget;
use crate::config::EngineConfig;
use crate::params::ParamBag;
use crate::registry::{EffectRegistry, ParamKind};
use crate::services::{ActionLog, Detached, Services};
use crate::strip::{Session, StripId};

/// How far past the last track `add-effect --track` may reach
const MAX_NEW_TRACKS: u32 = 16;

/// Build a session that records undoable actions into `log`
fn new_session(config: &EngineConfig, log: &Arc<ActionLog>) -> Session {
    Session::with_builtins(
        config.clone(),
        Services::new(log.clone(), Arc::new(Detached)),
    )
}

/// Load a project into a fresh session, reporting skipped effects
fn open_session(path: &Path, config: &EngineConfig, log: &Arc<ActionLog>) -> anyhow::Result<Session> {
    let mut session = new_session(config, log);
    let skipped = session
        .open(path)
        .with_context(|| format!("failed to open project {}", path.display()))?;
    for effect_type in skipped {
        warn!("skipped unknown or invalid effect '{}'", effect_type);
    }
    Ok(session)
}

/// Parse `path=value`; the value is read as JSON, falling back to a string
pub fn parse_param(arg: &str) -> anyhow::Result<(String, Value)> {
    let Some((path, raw)) = arg.split_once('=') else {
        bail!("expected path=value, got '{}'", arg);
    };
    let path = path.trim();
    if path.is_empty() {
        bail!("empty parameter path in '{}'", arg);
    }
    let value = serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((path.to_string(), value))
}

/// List every registered effect type.
pub fn list_effects(config: &EngineConfig) -> anyhow::Result<()> {
    let registry = EffectRegistry::with_builtins(config.sample_rate);

    for effect_type in registry.list_types() {
        let schema = registry.get_schema(effect_type)?;
        println!("{} ({})", schema.effect_type, schema.display_name);
        for spec in &schema.params {
            let range = match spec.kind {
                ParamKind::Continuous { min, max, .. } => format!(
                    "{} .. {}",
                    spec.format_value(&min.into()),
                    spec.format_value(&max.into())
                ),
                ParamKind::Enumerated { options, .. } => options.join(" | "),
            };
            println!(
                "  {:<20} {:<12} default {:<10} [{}]",
                spec.key,
                spec.label,
                spec.format_value(&spec.default_value()),
                range
            );
        }
    }
    Ok(())
}

/// Print each strip's chain and live topology.
pub fn inspect(path: &Path, config: &EngineConfig) -> anyhow::Result<()> {
    info!("Inspecting project: {}", path.display());

    let log = Arc::new(ActionLog::default());
    let session = open_session(path, config, &log)?;

    let strips = session.tracks().iter().chain(session.master());
    for strip in strips {
        println!(
            "{}: gain {:.2}, {}{}, -> {:?}",
            strip.id(),
            strip.gain(),
            if strip.mute_solo().muted { "muted" } else { "unmuted" },
            if strip.mute_solo().soloed { ", soloed" } else { "" },
            strip.downstream()
        );

        let chain = strip.chain();
        if chain.is_empty() {
            println!("  (empty chain)");
        }
        for descriptor in chain.serialize() {
            println!(
                "  {} [{}] {}",
                descriptor.id,
                descriptor.effect_type,
                descriptor.params.clone().into_value()
            );
        }

        match chain.topology() {
            Some(path) => {
                let kinds: Vec<String> = path
                    .iter()
                    .map(|&node| session.graph().node_kind(node).unwrap_or_default())
                    .collect();
                println!("  topology: {}", kinds.join(" -> "));
            }
            None => warn!("{}: chain wiring is not a simple path", strip.id()),
        }
    }
    Ok(())
}

/// Add an effect to one strip and save the project.
pub fn add_effect(
    path: &Path,
    config: &EngineConfig,
    target: StripTarget,
    effect_type: &str,
    param_args: &[String],
) -> anyhow::Result<()> {
    info!("Adding {} to project: {}", effect_type, path.display());

    let log = Arc::new(ActionLog::default());
    let mut session = if path.exists() {
        open_session(path, config, &log)?
    } else {
        info!("Creating new project at: {}", path.display());
        new_session(config, &log)
    };

    let strip_id = match target.track {
        Some(n) => {
            let limit = session.tracks().len() as u32 + MAX_NEW_TRACKS;
            if n >= limit {
                bail!(
                    "track {} is out of reach: the project has {} tracks (at most {} can be added)",
                    n,
                    session.tracks().len(),
                    MAX_NEW_TRACKS
                );
            }
            while session.track(StripId::Track(n)).is_none() {
                session.add_track();
            }
            StripId::Track(n)
        }
        None => session.create_master_bus(),
    };

    let mut params = ParamBag::new();
    for arg in param_args {
        let (key, value) = parse_param(arg)?;
        params.set(&key, value);
    }
    session
        .registry()
        .validate_params(effect_type, &params)
        .with_context(|| format!("invalid parameters for '{}'", effect_type))?;

    let strip = session.strip_mut(strip_id)?;
    let id = strip
        .chain_mut()
        .add_effect(effect_type, (!params.is_empty()).then_some(params))
        .with_context(|| format!("failed to add '{}' to {}", effect_type, strip_id))?;

    session.save(path)?;

    println!("Added {} to {}", id, strip_id);
    for label in log.labels() {
        println!("  action: {}", label);
    }
    Ok(())
}

/// Render a test tone through every track into a mono WAV file.
pub fn render(path: &Path, config: &EngineConfig, seconds: f32, output: &Path) -> anyhow::Result<()> {
    info!("Rendering {} for {}s", path.display(), seconds);

    if !(seconds > 0.0) {
        bail!("render length must be positive, got {}", seconds);
    }

    let log = Arc::new(ActionLog::default());
    let session = open_session(path, config, &log)?;
    if session.tracks().is_empty() {
        warn!("project has no tracks; rendering silence");
    }

    let sample_rate = config.sample_rate;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let total = (seconds * sample_rate as f32) as usize;
    let mut written = 0;
    while written < total {
        let offset = written;
        let block = session.render_block(|id, block| tone(id, offset, sample_rate, block));
        for &sample in block.iter().take(total - written) {
            writer.write_sample(sample)?;
        }
        written += block.len();
    }
    writer.finalize()?;

    println!("Rendered {} samples to {}", total, output.display());
    for (id, level) in session.meter_levels() {
        println!("  {:<10} {:>5.1}%", id.to_string(), level * 100.0);
    }
    Ok(())
}

/// Sine test tone: track n plays 220 Hz * (n + 1) at -12 dBFS
fn tone(id: StripId, offset: usize, sample_rate: u32, block: &mut [f32]) {
    let frequency = match id {
        StripId::Track(n) => 220.0 * (n + 1) as f32,
        StripId::Master => return,
    };
    for (i, sample) in block.iter_mut().enumerate() {
        let t = (offset + i) as f32 / sample_rate as f32;
        *sample = 0.25 * (TAU * frequency * t).sin();
    }
}
