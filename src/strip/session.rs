//! Session
//!
//! Owns the shared graph, the registry, every track and the optional master
//! bus. Tracks route into the master bus when it exists and straight to the
//! final output otherwise; routing is re-evaluated whenever the bus comes
//! or goes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, trace, warn};

use super::audibility::MuteSolo;
use super::channel_strip::ChannelStrip;
use super::{DownstreamSink, StripId};
use crate::config::EngineConfig;
use crate::error::{FxError, Result};
use crate::graph::AudioGraph;
use crate::metering::{MeterBoard, MeterSink, MeteringHandle, MeteringLoop};
use crate::project::{ProjectFile, StripRecord, PROJECT_VERSION};
use crate::registry::EffectRegistry;
use crate::services::Services;

/// A mixer session
pub struct Session {
    config: EngineConfig,
    graph: AudioGraph,
    registry: Arc<EffectRegistry>,
    services: Services,
    tracks: Vec<ChannelStrip>,
    master: Option<ChannelStrip>,
    next_track: u32,
    meters: MeterBoard,
}

impl Session {
    /// Create an empty session with no tracks and no master bus
    pub fn new(config: EngineConfig, registry: Arc<EffectRegistry>, services: Services) -> Self {
        let meters = MeterBoard::new(config.meter_floor_db);
        Self {
            config,
            graph: AudioGraph::new(),
            registry,
            services,
            tracks: Vec::new(),
            master: None,
            next_track: 0,
            meters,
        }
    }

    /// Create a session backed by a registry of the built-in effects
    pub fn with_builtins(config: EngineConfig, services: Services) -> Self {
        let registry = Arc::new(EffectRegistry::with_builtins(config.sample_rate));
        Self::new(config, registry, services)
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Add a track routed to the master bus (or the final output)
    pub fn add_track(&mut self) -> StripId {
        let id = StripId::Track(self.next_track);
        self.next_track += 1;

        let mut track = self.new_strip(id);
        track.connect_downstream(self.master.as_ref().map(|m| m as &dyn DownstreamSink));
        self.meters.insert(id, track.meter_probe());
        self.tracks.push(track);
        self.recompute_audibility();

        info!("added {}", id);
        id
    }

    /// Remove a track and release its nodes
    pub fn remove_track(&mut self, id: StripId) -> Result<()> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(FxError::StripNotFound { strip: id })?;

        self.meters.remove(id);
        drop(self.tracks.remove(index));
        self.recompute_audibility();

        info!("removed {}", id);
        Ok(())
    }

    pub fn tracks(&self) -> &[ChannelStrip] {
        &self.tracks
    }

    pub fn track_ids(&self) -> Vec<StripId> {
        self.tracks.iter().map(|t| t.id()).collect()
    }

    pub fn track(&self, id: StripId) -> Option<&ChannelStrip> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn track_mut(&mut self, id: StripId) -> Option<&mut ChannelStrip> {
        self.tracks.iter_mut().find(|t| t.id() == id)
    }

    /// Any strip by id; the master bus reports `MasterBusUnavailable`
    /// when it does not exist
    pub fn strip(&self, id: StripId) -> Result<&ChannelStrip> {
        match id {
            StripId::Master => self.master.as_ref().ok_or(FxError::MasterBusUnavailable),
            StripId::Track(_) => self.track(id).ok_or(FxError::StripNotFound { strip: id }),
        }
    }

    pub fn strip_mut(&mut self, id: StripId) -> Result<&mut ChannelStrip> {
        match id {
            StripId::Master => self.master.as_mut().ok_or(FxError::MasterBusUnavailable),
            StripId::Track(_) => self
                .tracks
                .iter_mut()
                .find(|t| t.id() == id)
                .ok_or(FxError::StripNotFound { strip: id }),
        }
    }

    // ========================================================================
    // Master bus
    // ========================================================================

    /// Create the master bus and route every track into it
    ///
    /// Calling this when the bus already exists only re-routes the tracks.
    pub fn create_master_bus(&mut self) -> StripId {
        if self.master.is_none() {
            let master = self.new_strip(StripId::Master);
            self.meters.insert(StripId::Master, master.meter_probe());
            self.master = Some(master);
            info!("created master bus");
        }
        self.reconnect_tracks();
        StripId::Master
    }

    /// Remove the master bus; tracks fall back to the final output
    pub fn remove_master_bus(&mut self) -> Result<()> {
        let master = self.master.take().ok_or(FxError::MasterBusUnavailable)?;
        self.meters.remove(StripId::Master);
        drop(master);
        self.reconnect_tracks();
        info!("removed master bus");
        Ok(())
    }

    pub fn master(&self) -> Option<&ChannelStrip> {
        self.master.as_ref()
    }

    pub fn master_mut(&mut self) -> Option<&mut ChannelStrip> {
        self.master.as_mut()
    }

    pub fn has_master_bus(&self) -> bool {
        self.master.is_some()
    }

    fn reconnect_tracks(&mut self) {
        let target = self.master.as_ref().map(|m| m as &dyn DownstreamSink);
        for track in &mut self.tracks {
            track.connect_downstream(target);
        }
    }

    // ========================================================================
    // Gain, mute and solo
    // ========================================================================

    /// Set a strip's gain; returns the clamped value applied
    pub fn set_gain(&mut self, id: StripId, value: f32, from_user_interaction: bool) -> Result<f32> {
        Ok(self.strip_mut(id)?.set_gain(value, from_user_interaction))
    }

    pub fn set_mute(&mut self, id: StripId, muted: bool) -> Result<()> {
        let strip = self.strip_mut(id)?;
        let state = strip.mute_solo();
        strip.set_mute_solo(MuteSolo { muted, ..state });
        self.recompute_audibility();
        Ok(())
    }

    /// Solo a track; the master bus cannot be soloed
    pub fn set_solo(&mut self, id: StripId, soloed: bool) -> Result<()> {
        if id.is_master() {
            warn!("ignoring solo request for the master bus");
            return Ok(());
        }
        let strip = self.strip_mut(id)?;
        let state = strip.mute_solo();
        strip.set_mute_solo(MuteSolo { soloed, ..state });
        self.recompute_audibility();
        Ok(())
    }

    /// Re-derive audibility for every strip from the primary flags
    pub fn recompute_audibility(&mut self) {
        let any_soloed = self.tracks.iter().any(|t| t.mute_solo().soloed);
        for track in &mut self.tracks {
            track.apply_mute_or_solo(any_soloed);
        }
        if let Some(master) = self.master.as_mut() {
            master.apply_mute_or_solo(false);
        }
    }

    /// Effective audibility per track, in track order
    pub fn audibility(&self) -> Vec<(StripId, bool)> {
        self.tracks
            .iter()
            .map(|t| (t.id(), t.is_audible()))
            .collect()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render one block
    ///
    /// `source` fills each track's input block. Tracks are rendered through
    /// their strips, summed, and the sum is passed through the master bus
    /// when there is one. A track whose path does not reach the bus (or the
    /// destination) contributes nothing, and neither does a master bus that
    /// does not reach the destination.
    pub fn render_block(&self, mut source: impl FnMut(StripId, &mut [f32])) -> Vec<f32> {
        let frames = self.config.block_size;
        let destination = self.graph.destination();
        let bus_input = self.master.as_ref().map(|m| m.input_node());
        let stop = bus_input.unwrap_or(destination);

        let mut mix = vec![0.0_f32; frames];
        let mut block = vec![0.0_f32; frames];
        for track in &self.tracks {
            block.fill(0.0);
            source(track.id(), &mut block);
            let reached = self.graph.process_path(track.input_node(), stop, &mut block);
            if reached != stop {
                trace!("{}: path ends before the mix, dropping block", track.id());
                continue;
            }
            for (out, sample) in mix.iter_mut().zip(&block) {
                *out += sample;
            }
        }

        if let Some(input) = bus_input {
            if self.graph.process_path(input, destination, &mut mix) != destination {
                trace!("master bus path ends before the destination, dropping block");
                mix.fill(0.0);
            }
        }
        mix
    }

    // ========================================================================
    // Metering
    // ========================================================================

    /// Shared meter board covering every strip
    pub fn meter_board(&self) -> MeterBoard {
        self.meters.clone()
    }

    /// Normalised meter level per strip, tracks first
    pub fn meter_levels(&self) -> Vec<(StripId, f32)> {
        self.tracks
            .iter()
            .chain(self.master.iter())
            .map(|s| (s.id(), s.read_meter_level()))
            .collect()
    }

    /// Start the metering loop at the configured cadence
    pub fn spawn_metering(&self, sink: Arc<dyn MeterSink>) -> Result<MeteringHandle> {
        MeteringLoop::spawn(
            self.meter_board(),
            sink,
            Duration::from_millis(self.config.meter_interval_ms),
        )
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn to_project(&self) -> ProjectFile {
        ProjectFile {
            version: PROJECT_VERSION,
            master: self.master.as_ref().map(ChannelStrip::to_record),
            tracks: self.tracks.iter().map(ChannelStrip::to_record).collect(),
        }
    }

    /// Replace the whole session with `project`
    ///
    /// No undo checkpoints are requested while loading. Effects of unknown
    /// type or with rejected params are skipped; their types are returned.
    pub fn load_project(&mut self, project: &ProjectFile) -> Vec<String> {
        let _guard = self.services.begin_load();

        self.meters.clear();
        self.tracks.clear();
        self.next_track = 0;
        self.master = None;

        let mut skipped = Vec::new();
        if let Some(record) = &project.master {
            self.create_master_bus();
            skipped.extend(self.apply_record(StripId::Master, record));
        }
        for record in &project.tracks {
            let id = self.add_track();
            skipped.extend(self.apply_record(id, record));
        }
        self.recompute_audibility();
        // Start from the loaded gains rather than ramping up from unity
        self.graph.reset_all();

        if !skipped.is_empty() {
            warn!("project loaded with {} skipped effects", skipped.len());
        }
        info!(
            "loaded project: {} tracks, {} effects, master bus: {}",
            self.tracks.len(),
            project.effect_count().saturating_sub(skipped.len()),
            self.master.is_some()
        );
        skipped
    }

    fn apply_record(&mut self, id: StripId, record: &StripRecord) -> Vec<String> {
        match self.strip_mut(id) {
            Ok(strip) => strip.apply_record(record),
            Err(e) => {
                warn!("cannot restore {}: {}", id, e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_project().save(path)?;
        info!("saved project to {}", path.display());
        Ok(())
    }

    /// Load a project file into this session; returns skipped effect types
    pub fn open(&mut self, path: &Path) -> Result<Vec<String>> {
        let project = ProjectFile::load(path)?;
        Ok(self.load_project(&project))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn new_strip(&self, id: StripId) -> ChannelStrip {
        ChannelStrip::new(
            id,
            self.graph.clone(),
            Arc::clone(&self.registry),
            self.services.clone(),
            &self.config,
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tracks", &self.tracks)
            .field("master", &self.master)
            .field("graph", &self.graph)
            .finish()
    }
}
