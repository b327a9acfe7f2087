//! Routing output across reels and writing the package summary.

use std::path::{Path, PathBuf};

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::{DcpTime, Period};
use reelkit_player::{AudioBuffers, Eyes, ReferencedAsset, TextUnit};
use reelkit_timeline_model::ProjectSettings;
use serde::{Deserialize, Serialize};

use crate::reel_writer::{directory_name, ReelReference, ReelSummary, ReelWriter};

pub const PACKAGE_FILE: &str = "package.json";

/// What a finished package contains; written as `package.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub video_frame_rate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: usize,
    pub three_d: bool,
    pub width: u32,
    pub height: u32,
    pub reels: Vec<ReelSummary>,
}

/// Multi-reel writer for one mastering run.
pub struct Writer {
    root: PathBuf,
    settings: ProjectSettings,
    reels: Vec<ReelWriter>,
}

impl Writer {
    pub fn new(root: &Path, reels: &[Period], settings: &ProjectSettings) -> ReelkitResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| ReelkitError::write(root, e.to_string()))?;
        let reels = reels
            .iter()
            .enumerate()
            .map(|(index, period)| ReelWriter::create(root, index, *period, settings))
            .collect::<ReelkitResult<Vec<_>>>()?;
        Ok(Self {
            root: root.to_path_buf(),
            settings: settings.clone(),
            reels,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reel_index(&self, time: DcpTime) -> ReelkitResult<usize> {
        self.reels
            .iter()
            .position(|r| r.period().contains(time))
            .ok_or_else(|| {
                ReelkitError::write(
                    &self.root,
                    format!("output time {} lies outside every reel", time.get()),
                )
            })
    }

    /// Previous encoded bytes for a picture whose source is unchanged.
    pub fn existing(
        &mut self,
        time: DcpTime,
        eyes: Eyes,
        hash: &str,
    ) -> ReelkitResult<Option<Vec<u8>>> {
        let index = self.reel_index(time)?;
        self.reels[index].existing(time, eyes, hash)
    }

    pub fn write_frame(
        &mut self,
        time: DcpTime,
        eyes: Eyes,
        hash: &str,
        data: &[u8],
    ) -> ReelkitResult<()> {
        let index = self.reel_index(time)?;
        self.reels[index].write_frame(time, eyes, hash, data)
    }

    /// Write sound starting at `time`, splitting it where it crosses into
    /// the next reel.
    pub fn write_audio(&mut self, time: DcpTime, buffers: &AudioBuffers) -> ReelkitResult<()> {
        let sample_rate = self.settings.audio_sample_rate as f64;
        let mut at = time;
        let mut offset = 0;
        while offset < buffers.frames() {
            let index = self.reel_index(at)?;
            let end = self.reels[index].period().to;
            let room = (end - at).frames_round(sample_rate).max(1) as usize;
            let take = room.min(buffers.frames() - offset);
            self.reels[index].write_audio(&buffers.slice(offset, offset + take))?;
            offset += take;
            at = time + DcpTime::from_frames(offset as i64, sample_rate);
        }
        Ok(())
    }

    /// Record the captions shown over the frame starting at `time`.
    pub fn write_text(&mut self, time: DcpTime, units: &[TextUnit]) -> ReelkitResult<()> {
        if units.is_empty() {
            return Ok(());
        }
        let fps = self.settings.fps();
        let to = DcpTime::from_frames(time.frames_round(fps) + 1, fps);
        let index = self.reel_index(time)?;
        self.reels[index].write_text(time, to, units);
        Ok(())
    }

    /// Point each packaged reel of `asset` at the output reel it occupies.
    pub fn add_referenced(&mut self, asset: &ReferencedAsset) -> ReelkitResult<()> {
        for period in &asset.reels {
            let index = self.reel_index(period.from)?;
            self.reels[index].add_reference(ReelReference::new(asset, *period));
        }
        Ok(())
    }

    /// Finish every reel, write `package.json`, and remove reel directories
    /// left by earlier runs with a different split.
    pub fn finish(mut self) -> ReelkitResult<PackageSummary> {
        let mut summaries = Vec::with_capacity(self.reels.len());
        for reel in &mut self.reels {
            summaries.push(reel.finish()?);
        }

        let package = PackageSummary {
            video_frame_rate: self.settings.video_frame_rate,
            audio_sample_rate: self.settings.audio_sample_rate,
            audio_channels: self.settings.audio_channels,
            three_d: self.settings.three_d,
            width: self.settings.width,
            height: self.settings.height,
            reels: summaries,
        };
        let path = self.root.join(PACKAGE_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&package)?)
            .map_err(|e| ReelkitError::write(&path, e.to_string()))?;

        self.remove_stale_reels(&package)?;
        tracing::info!(root = %self.root.display(), reels = package.reels.len(), "Package written");
        Ok(package)
    }

    fn remove_stale_reels(&self, package: &PackageSummary) -> ReelkitResult<()> {
        let current: Vec<String> = package
            .reels
            .iter()
            .map(|r| directory_name(&r.period))
            .collect();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("reel-") || current.contains(&name) || !entry.path().is_dir() {
                continue;
            }
            tracing::debug!(dir = %name, "Removing stale reel");
            std::fs::remove_dir_all(entry.path())
                .map_err(|e| ReelkitError::write(entry.path(), e.to_string()))?;
        }
        Ok(())
    }
}
