//! Metering Loop
//!
//! Samples every strip's meter at a fixed cadence and pushes normalised
//! levels to the presentation layer. The loop only reads lock-free meter
//! probes and never touches chain structure; if the board is being edited
//! it skips the pass instead of waiting.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};

use crate::error::Result;
use crate::graph::MeterProbe;
use crate::strip::StripId;

/// Map a raw RMS reading onto 0.0 (floor or silent) ..= 1.0 (0 dBFS)
///
/// A missing reading (meter not ready or disposed) is reported as silence.
pub fn normalize_level(rms: Option<f32>, floor_db: f32) -> f32 {
    let Some(rms) = rms else {
        return 0.0;
    };
    if !(rms > 0.0) {
        return 0.0;
    }
    let db = 20.0 * rms.log10();
    ((db - floor_db) / -floor_db).clamp(0.0, 1.0)
}

/// Presentation target for meter levels
pub trait MeterSink: Send + Sync {
    fn publish_levels(&self, levels: &[(StripId, f32)]);
}

/// Shared set of meter probes, keyed by strip
#[derive(Debug, Clone)]
pub struct MeterBoard {
    probes: Arc<RwLock<BTreeMap<StripId, MeterProbe>>>,
    floor_db: f32,
}

impl MeterBoard {
    pub fn new(floor_db: f32) -> Self {
        Self {
            probes: Arc::new(RwLock::new(BTreeMap::new())),
            floor_db,
        }
    }

    pub fn insert(&self, id: StripId, probe: MeterProbe) {
        self.probes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, probe);
    }

    pub fn remove(&self, id: StripId) {
        self.probes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn clear(&self) {
        self.probes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.probes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }

    /// Current normalised levels, or `None` if the board is busy
    pub fn try_levels(&self) -> Option<Vec<(StripId, f32)>> {
        let probes = match self.probes.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(
            probes
                .iter()
                .map(|(&id, probe)| (id, normalize_level(probe.rms(), self.floor_db)))
                .collect(),
        )
    }
}

/// Periodic meter sampler
pub struct MeteringLoop;

impl MeteringLoop {
    /// One metering pass; returns false when the pass was skipped
    pub fn tick(board: &MeterBoard, sink: &dyn MeterSink) -> bool {
        match board.try_levels() {
            Some(levels) => {
                sink.publish_levels(&levels);
                true
            }
            None => {
                trace!("meter board busy, skipping pass");
                false
            }
        }
    }

    /// Run `tick` every `interval` on a dedicated thread
    pub fn spawn(
        board: MeterBoard,
        sink: Arc<dyn MeterSink>,
        interval: Duration,
    ) -> Result<MeteringHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("fxroute-meter".to_string())
            .spawn(move || {
                debug!("metering loop started ({:?} interval)", interval);
                while !stop_flag.load(Ordering::Acquire) {
                    MeteringLoop::tick(&board, sink.as_ref());
                    thread::park_timeout(interval);
                }
                debug!("metering loop stopped");
            })?;

        Ok(MeteringHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops the metering thread when stopped explicitly or dropped
#[derive(Debug)]
pub struct MeteringHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MeteringHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the loop and wait for it to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for MeteringHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MeterNode, ProcessingNode};
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<(StripId, f32)>>>,
    }

    impl MeterSink for Recorder {
        fn publish_levels(&self, levels: &[(StripId, f32)]) {
            self.batches.lock().unwrap().push(levels.to_vec());
        }
    }

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level(None, -60.0), 0.0);
        assert_eq!(normalize_level(Some(0.0), -60.0), 0.0);
        assert_relative_eq!(normalize_level(Some(1.0), -60.0), 1.0);
        assert_relative_eq!(normalize_level(Some(0.001), -60.0), 0.0, epsilon = 1e-5);
        assert_relative_eq!(normalize_level(Some(0.031_622_78), -60.0), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_tick_reads_all_probes() {
        let board = MeterBoard::new(-60.0);
        let mut loud = MeterNode::new();
        let quiet = MeterNode::new();
        board.insert(StripId::Track(0), loud.probe());
        board.insert(StripId::Track(1), quiet.probe());

        let mut block = [1.0_f32; 16];
        loud.process(&mut block);

        let sink = Recorder::default();
        assert!(MeteringLoop::tick(&board, &sink));
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches[0], vec![(StripId::Track(0), 1.0), (StripId::Track(1), 0.0)]);
    }

    #[test]
    fn test_disposed_meter_reads_silent() {
        let board = MeterBoard::new(-60.0);
        let mut meter = MeterNode::new();
        board.insert(StripId::Master, meter.probe());
        meter.process(&mut [0.5_f32; 8]);
        drop(meter);

        let levels = board.try_levels().unwrap();
        assert_eq!(levels, vec![(StripId::Master, 0.0)]);
    }

    #[test]
    fn test_busy_board_skips_pass() {
        let board = MeterBoard::new(-60.0);
        let sink = Recorder::default();
        let _writer = board.probes.write().unwrap();

        assert!(!MeteringLoop::tick(&board, &sink));
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_spawn_and_stop() {
        let board = MeterBoard::new(-60.0);
        board.insert(StripId::Track(0), MeterNode::new().probe());
        let sink = Arc::new(Recorder::default());

        let handle =
            MeteringLoop::spawn(board, sink.clone(), Duration::from_millis(2)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(handle.is_running());
        handle.stop();

        assert!(!sink.batches.lock().unwrap().is_empty());
    }
}
