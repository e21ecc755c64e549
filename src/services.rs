//! Collaborator interfaces
//!
//! The routing core reports structural changes through two narrow
//! services: the project service (undo bookkeeping) and the presentation
//! service (view refresh). Both are invoked synchronously, right after the
//! mutation has been applied to the graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strip::StripId;

/// Default number of recorded actions kept by `ActionLog`
pub const DEFAULT_MAX_ACTIONS: usize = 50;

/// Undo / project bookkeeping service
pub trait ProjectService: Send + Sync {
    /// A structural mutation happened on `owner`'s chain
    fn notify_chain_changed(&self, owner: StripId, action_label: &str);

    /// Whether a project load is replaying chains right now
    fn is_reconstructing_project(&self) -> bool;
}

/// View refresh service
pub trait PresentationService: Send + Sync {
    fn notify_effects_list_changed(&self, owner: StripId);
}

/// Collaborator that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl ProjectService for Detached {
    fn notify_chain_changed(&self, _owner: StripId, _action_label: &str) {}

    fn is_reconstructing_project(&self) -> bool {
        false
    }
}

impl PresentationService for Detached {
    fn notify_effects_list_changed(&self, _owner: StripId) {}
}

/// Bundle of collaborators handed to every chain and strip
#[derive(Clone)]
pub struct Services {
    project: Arc<dyn ProjectService>,
    presentation: Arc<dyn PresentationService>,
    loading: Arc<AtomicBool>,
}

impl Services {
    pub fn new(project: Arc<dyn ProjectService>, presentation: Arc<dyn PresentationService>) -> Self {
        Self {
            project,
            presentation,
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Services that drop every notification
    pub fn detached() -> Self {
        Self::new(Arc::new(Detached), Arc::new(Detached))
    }

    /// True while a project load is replaying chains
    pub fn is_reconstructing(&self) -> bool {
        self.loading.load(Ordering::Acquire) || self.project.is_reconstructing_project()
    }

    /// Mark a local project load; cleared when the guard drops
    pub fn begin_load(&self) -> LoadGuard {
        let previous = self.loading.swap(true, Ordering::AcqRel);
        LoadGuard {
            flag: Arc::clone(&self.loading),
            previous,
        }
    }

    /// Report a structural chain change: refresh the view, then record an
    /// undoable action unless a project is being reconstructed
    pub(crate) fn chain_changed(&self, owner: StripId, action_label: &str) {
        self.presentation.notify_effects_list_changed(owner);
        self.checkpoint(owner, action_label);
    }

    /// Record an undoable action unless a project is being reconstructed
    pub(crate) fn checkpoint(&self, owner: StripId, action_label: &str) {
        if !self.is_reconstructing() {
            self.project.notify_chain_changed(owner, action_label);
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("loading", &self.loading.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Restores the load flag when dropped
#[derive(Debug)]
pub struct LoadGuard {
    flag: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

// ============================================================================
// Action Log
// ============================================================================

/// One recorded undoable action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAction {
    /// Unique identifier for this action
    pub id: String,
    /// Strip whose chain or gain changed
    pub owner: StripId,
    /// Human-readable description ("Add Reverb")
    pub label: String,
    /// When the action was recorded
    pub timestamp: DateTime<Utc>,
}

/// In-memory `ProjectService` keeping the most recent actions
#[derive(Debug)]
pub struct ActionLog {
    actions: Mutex<Vec<ChainAction>>,
    reconstructing: AtomicBool,
    max_actions: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIONS)
    }
}

impl ActionLog {
    pub fn new(max_actions: usize) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            reconstructing: AtomicBool::new(false),
            max_actions: max_actions.max(1),
        }
    }

    /// Snapshot of recorded actions, oldest first
    pub fn actions(&self) -> Vec<ChainAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Labels of recorded actions, oldest first
    pub fn labels(&self) -> Vec<String> {
        self.actions().into_iter().map(|a| a.label).collect()
    }

    pub fn len(&self) -> usize {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_reconstructing(&self, value: bool) {
        self.reconstructing.store(value, Ordering::Release);
    }

    /// Flag a reconstruction until the returned guard drops
    pub fn begin_reconstruction(&self) -> ReconstructionGuard<'_> {
        let previous = self.reconstructing.swap(true, Ordering::AcqRel);
        ReconstructionGuard {
            log: self,
            previous,
        }
    }
}

/// Restores an `ActionLog`'s reconstruction flag when dropped
#[derive(Debug)]
pub struct ReconstructionGuard<'a> {
    log: &'a ActionLog,
    previous: bool,
}

impl Drop for ReconstructionGuard<'_> {
    fn drop(&mut self) {
        self.log.set_reconstructing(self.previous);
    }
}

impl ProjectService for ActionLog {
    fn notify_chain_changed(&self, owner: StripId, action_label: &str) {
        let mut actions = self.actions.lock().unwrap_or_else(PoisonError::into_inner);
        actions.push(ChainAction {
            id: Uuid::new_v4().to_string(),
            owner,
            label: action_label.to_string(),
            timestamp: Utc::now(),
        });
        if actions.len() > self.max_actions {
            let excess = actions.len() - self.max_actions;
            actions.drain(..excess);
        }
    }

    fn is_reconstructing_project(&self) -> bool {
        self.reconstructing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_log_trims() {
        let log = ActionLog::new(2);
        log.notify_chain_changed(StripId::Track(0), "Add Reverb");
        log.notify_chain_changed(StripId::Track(0), "Add Delay");
        log.notify_chain_changed(StripId::Master, "Remove Delay");

        assert_eq!(log.labels(), vec!["Add Delay", "Remove Delay"]);
        assert_ne!(log.actions()[0].id, log.actions()[1].id);
    }

    #[test]
    fn test_reconstruction_suppresses_checkpoints() {
        let log = Arc::new(ActionLog::default());
        let services = Services::new(log.clone(), Arc::new(Detached));

        {
            let _guard = services.begin_load();
            services.chain_changed(StripId::Track(1), "Add Filter");
        }
        assert!(log.is_empty());

        log.set_reconstructing(true);
        services.checkpoint(StripId::Track(1), "Set gain");
        assert!(log.is_empty());

        log.set_reconstructing(false);
        services.chain_changed(StripId::Track(1), "Add Filter");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_reconstruction_guard_restores_flag() {
        let log = ActionLog::default();
        {
            let _guard = log.begin_reconstruction();
            assert!(log.is_reconstructing_project());
        }
        assert!(!log.is_reconstructing_project());
    }
}
