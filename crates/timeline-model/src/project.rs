//! Project settings and the on-disk project bundle.
//!
//! A project directory holds `project.json` (settings plus playlist) and,
//! after mastering, an `output/` directory of reels.

use std::path::{Path, PathBuf};

use reelkit_common::config::ProjectDefaults;
use reelkit_common::error::{ReelkitError, ReelkitResult};
use serde::{Deserialize, Serialize};

use crate::playlist::Playlist;
use crate::reel::ReelType;

/// Output settings for a mastering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Output video frame rate (integer rates only).
    pub video_frame_rate: u32,

    pub audio_sample_rate: u32,

    pub audio_channels: usize,

    /// Stereoscopic output.
    #[serde(default)]
    pub three_d: bool,

    #[serde(default)]
    pub reel_type: ReelType,

    /// Reel budget for [`ReelType::ByLength`], in bytes.
    pub reel_length_bytes: u64,

    /// Picture bit rate in bits per second.
    pub j2k_bandwidth: u64,

    pub width: u32,
    pub height: u32,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self::from_defaults(&ProjectDefaults::default())
    }
}

impl ProjectSettings {
    pub fn from_defaults(defaults: &ProjectDefaults) -> Self {
        Self {
            video_frame_rate: defaults.video_frame_rate,
            audio_sample_rate: defaults.audio_sample_rate,
            audio_channels: defaults.audio_channels,
            three_d: false,
            reel_type: ReelType::Single,
            reel_length_bytes: defaults.reel_length_bytes,
            j2k_bandwidth: defaults.j2k_bandwidth,
            width: defaults.width,
            height: defaults.height,
        }
    }

    pub fn fps(&self) -> f64 {
        self.video_frame_rate as f64
    }

    /// Audio samples in one output frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.audio_sample_rate / self.video_frame_rate.max(1)) as usize
    }

    /// Eyes written per output frame.
    pub fn eyes_per_frame(&self) -> usize {
        if self.three_d {
            2
        } else {
            1
        }
    }

    /// Bytes one encoded frame may occupy at the configured bandwidth.
    pub fn bytes_per_frame(&self) -> u64 {
        self.j2k_bandwidth / 8 / self.video_frame_rate.max(1) as u64
    }

    pub fn validate(&self) -> ReelkitResult<()> {
        if self.video_frame_rate == 0 {
            return Err(ReelkitError::config("Video frame rate must be positive"));
        }
        if self.audio_sample_rate == 0 || self.audio_sample_rate % self.video_frame_rate != 0 {
            return Err(ReelkitError::config(format!(
                "Audio sample rate {} is not a whole number of samples per frame at {} fps",
                self.audio_sample_rate, self.video_frame_rate
            )));
        }
        if self.audio_channels == 0 {
            return Err(ReelkitError::config("At least one audio channel is required"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ReelkitError::config("Picture size must be non-zero"));
        }
        if self.j2k_bandwidth == 0 {
            return Err(ReelkitError::config("Picture bandwidth must be positive"));
        }
        Ok(())
    }
}

/// Top-level project file (`project.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Schema version.
    pub version: String,

    pub name: String,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,

    /// Last modified timestamp (RFC 3339).
    pub modified_at: String,

    pub settings: ProjectSettings,

    pub playlist: Playlist,
}

impl Project {
    pub fn new(name: impl Into<String>, settings: ProjectSettings) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let playlist = Playlist::new(settings.video_frame_rate, settings.three_d);
        Self {
            version: "1.0".to_string(),
            name: name.into(),
            created_at: now.clone(),
            modified_at: now,
            settings,
            playlist,
        }
    }
}

/// A project loaded from a directory.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub root: PathBuf,
    pub project: Project,
}

impl LoadedProject {
    pub fn project_file(root: &Path) -> PathBuf {
        root.join("project.json")
    }

    /// Default mastering output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn load(root: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();
        let path = Self::project_file(&root);
        let content = std::fs::read_to_string(&path).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let project: Project =
            serde_json::from_str(&content).map_err(|e| ProjectError::ParseError {
                path: path.clone(),
                source: e,
            })?;
        project
            .settings
            .validate()
            .map_err(|e| ProjectError::ValidationError {
                message: e.to_string(),
            })?;
        Ok(Self { root, project })
    }

    pub fn save(&mut self) -> Result<(), ProjectError> {
        std::fs::create_dir_all(&self.root).map_err(|e| ProjectError::IoError {
            path: self.root.clone(),
            source: e,
        })?;
        self.project.modified_at = chrono::Utc::now().to_rfc3339();

        let path = Self::project_file(&self.root);
        let json =
            serde_json::to_string_pretty(&self.project).map_err(|e| ProjectError::ParseError {
                path: path.clone(),
                source: e,
            })?;
        std::fs::write(&path, json).map_err(|e| ProjectError::IoError { path, source: e })?;
        Ok(())
    }

    /// Create a new project directory.
    pub fn create(
        root: impl AsRef<Path>,
        name: impl Into<String>,
        settings: ProjectSettings,
    ) -> Result<Self, ProjectError> {
        settings
            .validate()
            .map_err(|e| ProjectError::ValidationError {
                message: e.to_string(),
            })?;
        let mut loaded = Self {
            root: root.as_ref().to_path_buf(),
            project: Project::new(name, settings),
        };
        loaded.save()?;
        Ok(loaded)
    }
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

impl From<ProjectError> for ReelkitError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::IoError { path, source } => {
                ReelkitError::write(path, source.to_string())
            }
            ProjectError::ParseError { source, .. } => ReelkitError::Json(source),
            ProjectError::ValidationError { message } => ReelkitError::config(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;

    #[test]
    fn test_default_settings_validate() {
        let settings = ProjectSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.samples_per_frame(), 2000);
        assert_eq!(settings.eyes_per_frame(), 1);
    }

    #[test]
    fn test_uneven_samples_per_frame_rejected() {
        let settings = ProjectSettings {
            video_frame_rate: 25,
            audio_sample_rate: 44_100 + 10,
            ..ProjectSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_create_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("feature");

        let mut created =
            LoadedProject::create(&root, "Feature", ProjectSettings::default()).unwrap();
        created
            .project
            .playlist
            .add(Content::colour("slate", (0, 0, 0), 48, 24.0))
            .unwrap();
        created.save().unwrap();

        let loaded = LoadedProject::load(&root).unwrap();
        assert_eq!(loaded.project.name, "Feature");
        assert_eq!(loaded.project.playlist.content().len(), 1);
        assert_eq!(loaded.output_dir(), root.join("output"));
    }

    #[test]
    fn test_load_missing_project_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoadedProject::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("project.json"));
    }
}
