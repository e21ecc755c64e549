//! Project files
//!
//! A project stores, per strip, the gain, mute/solo flags and the effect
//! chain as `{type, params}` records. Effect ids are not stored; they are
//! regenerated on load.

use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::chain::EffectRecord;
use crate::error::{FxError, Result};

/// Current project format version
pub const PROJECT_VERSION: u32 = 1;

fn default_version() -> u32 {
    PROJECT_VERSION
}

fn unity() -> f32 {
    1.0
}

/// Persisted state of one channel strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripRecord {
    #[serde(default = "unity")]
    pub gain: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    #[serde(default)]
    pub effects: Vec<EffectRecord>,
}

impl Default for StripRecord {
    fn default() -> Self {
        Self {
            gain: unity(),
            muted: false,
            soloed: false,
            effects: Vec::new(),
        }
    }
}

/// A saved session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<StripRecord>,
    #[serde(default)]
    pub tracks: Vec<StripRecord>,
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION,
            master: None,
            tracks: Vec::new(),
        }
    }
}

impl ProjectFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let project: ProjectFile = serde_json::from_str(json)?;
        if project.version == 0 {
            return Err(FxError::InvalidProject {
                reason: "version 0 is not a valid project version".to_string(),
            });
        }
        if project.version > PROJECT_VERSION {
            warn!(
                "project version {} is newer than supported version {}; loading anyway",
                project.version, PROJECT_VERSION
            );
        }
        Ok(project)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Every effect record in the project, master first
    pub fn effect_count(&self) -> usize {
        self.master
            .iter()
            .chain(self.tracks.iter())
            .map(|strip| strip.effects.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_version_zero_is_rejected() {
        let err = ProjectFile::from_json_str(r#"{"version": 0, "tracks": []}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PROJECT");
    }

    #[test]
    fn test_minimal_project_fills_defaults() {
        let project = ProjectFile::from_json_str(
            r#"{"tracks": [{"effects": [{"type": "Reverb"}]}, {}]}"#,
        )
        .unwrap();

        assert_eq!(project.version, PROJECT_VERSION);
        assert!(project.master.is_none());
        assert_eq!(project.tracks.len(), 2);
        assert_eq!(project.tracks[0].gain, 1.0);
        assert_eq!(project.tracks[0].effects[0].effect_type, "Reverb");
        assert!(project.tracks[0].effects[0].params.is_empty());
        assert!(project.tracks[1].effects.is_empty());
        assert_eq!(project.effect_count(), 1);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = ProjectFile::from_json_str("{tracks: ").unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let project = ProjectFile {
            master: Some(StripRecord {
                gain: 0.5,
                ..StripRecord::default()
            }),
            tracks: vec![StripRecord {
                muted: true,
                ..StripRecord::default()
            }],
            ..ProjectFile::default()
        };
        project.save(&path).unwrap();

        assert_eq!(ProjectFile::load(&path).unwrap(), project);
    }
}
