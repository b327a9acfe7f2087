//! Mastering a playlist into a package.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reelkit_common::config::EncodingConfig;
use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::{DcpTime, Period};
use reelkit_player::{check_reference, DecoderFactory, Player, PlayerOptions, ReferencedAsset};
use reelkit_timeline_model::{compute_reels, ContentKind, PlaylistSnapshot, ProjectSettings};

use crate::codec::FrameEncoder;
use crate::encoder::{EncodedFrame, Encoder, EncoderOptions, FrameJob, JobWork};
use crate::reel_writer::ReelSummary;
use crate::status::JobHandle;
use crate::writer::Writer;

/// Settings for one mastering run, built once and passed in.
#[derive(Debug, Clone)]
pub struct MasteringConfig {
    pub encoding: EncodingConfig,
    /// Package directory; reels are written beneath it.
    pub output: PathBuf,
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct TranscodeSummary {
    pub output: PathBuf,
    pub reels: Vec<ReelSummary>,
    pub frames_encoded: u64,
    pub frames_reused: u64,
    /// Pieces of content included by pointer.
    pub referenced: usize,
}

pub struct Transcoder {
    snapshot: Arc<PlaylistSnapshot>,
    settings: ProjectSettings,
    config: MasteringConfig,
    decoders: Arc<dyn DecoderFactory>,
    codec: Arc<dyn FrameEncoder>,
    cancel: Arc<AtomicBool>,
    job: Option<JobHandle>,
}

impl Transcoder {
    pub fn new(
        snapshot: Arc<PlaylistSnapshot>,
        settings: ProjectSettings,
        config: MasteringConfig,
        decoders: Arc<dyn DecoderFactory>,
        codec: Arc<dyn FrameEncoder>,
    ) -> Self {
        Self {
            snapshot,
            settings,
            config,
            decoders,
            codec,
            cancel: Arc::new(AtomicBool::new(false)),
            job: None,
        }
    }

    /// Report progress and outcome to `job`.
    pub fn with_job(mut self, job: JobHandle) -> Self {
        self.job = Some(job);
        self
    }

    /// Set to stop the run after the current player step.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Check that the run can start; returns the reel split.
    pub fn preflight(&self) -> ReelkitResult<Vec<Period>> {
        self.settings.validate()?;
        self.config.encoding.validate()?;

        for content in self.snapshot.content().iter().filter(|c| c.reference) {
            check_reference(&self.snapshot, &self.settings, content.id)
                .map_err(|refusal| ReelkitError::reference(refusal.to_string()))?;
        }

        let reels = compute_reels(&self.snapshot, &self.settings);
        if reels.is_empty() {
            return Err(ReelkitError::playlist(
                "The playlist is empty; there is nothing to master",
            ));
        }
        Ok(reels)
    }

    pub fn run(&self) -> ReelkitResult<TranscodeSummary> {
        if let Some(job) = &self.job {
            job.start();
        }
        let result = self.master();
        if let Some(job) = &self.job {
            match &result {
                Ok(_) => job.finish_ok(),
                Err(ReelkitError::Cancelled) => job.cancelled(),
                Err(e) => job.fail(e.to_string()),
            }
        }
        result
    }

    fn master(&self) -> ReelkitResult<TranscodeSummary> {
        let reels = self.preflight()?;
        let fps = self.settings.fps();
        tracing::info!(
            output = %self.config.output.display(),
            reels = reels.len(),
            length = self.snapshot.length().seconds(),
            "Starting mastering run"
        );

        let mut player = Player::new(
            self.snapshot.clone(),
            self.decoders.as_ref(),
            self.settings.clone(),
            PlayerOptions::default(),
        )?;
        let mut writer = Writer::new(&self.config.output, &reels, &self.settings)?;
        let referenced = player.referenced_assets();
        for asset in &referenced {
            writer.add_referenced(asset)?;
        }

        let mut encoder = Encoder::new(
            EncoderOptions::new(&self.config.encoding, &self.settings)?,
            self.codec.clone(),
        )?;
        let total = picture_jobs(&player, &referenced, &self.settings);
        let mut counts = Counts::default();

        while let Some(quantum) = player.pass()? {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(time = quantum.time.seconds(), "Mastering cancelled");
                return Err(ReelkitError::Cancelled);
            }

            for video in &quantum.video {
                let hash = video.source_hash();
                let work = match writer.existing(video.time, video.eyes, &hash)? {
                    Some(data) => JobWork::Reuse(data),
                    None => JobWork::Encode(video.image.clone()),
                };
                let ready = encoder.submit(FrameJob {
                    frame: video.time.frames_round(fps),
                    eyes: video.eyes,
                    source_hash: hash,
                    work,
                })?;
                write_frames(&mut writer, ready, fps, &mut counts)?;
                self.report_progress(&counts, total);
            }
            if let Some(audio) = &quantum.audio {
                writer.write_audio(quantum.time, &audio.buffers)?;
            }
            writer.write_text(quantum.time, &quantum.text)?;
        }

        let ready = encoder.finish()?;
        write_frames(&mut writer, ready, fps, &mut counts)?;
        let package = writer.finish()?;
        self.report_progress(&counts, total);

        tracing::info!(
            encoded = counts.encoded,
            reused = counts.reused,
            referenced = referenced.len(),
            "Mastering finished"
        );
        Ok(TranscodeSummary {
            output: self.config.output.clone(),
            reels: package.reels,
            frames_encoded: counts.encoded,
            frames_reused: counts.reused,
            referenced: referenced.len(),
        })
    }

    /// Progress is pictures written to their reel over pictures expected.
    fn report_progress(&self, counts: &Counts, total: u64) {
        if let Some(job) = &self.job {
            job.set_progress((counts.encoded + counts.reused) as f64 / total as f64);
        }
    }
}

/// Pictures the run will write: one per eye for every frame not covered by
/// referenced video.
fn picture_jobs(
    player: &Player,
    referenced: &[ReferencedAsset],
    settings: &ProjectSettings,
) -> u64 {
    let fps = settings.fps();
    let referenced_video: Vec<Period> = referenced
        .iter()
        .filter(|asset| asset.kind == ContentKind::Video)
        .flat_map(|asset| asset.reels.iter().copied())
        .collect();
    let passed_through: i64 = Period::coalesce(&referenced_video)
        .iter()
        .map(|period| period.duration().frames_round(fps))
        .sum();
    let eyes = if settings.three_d { 2 } else { 1 };
    let frames = player.length().frames_round(fps) - passed_through;
    (frames.max(0) as u64 * eyes).max(1)
}

#[derive(Debug, Default)]
struct Counts {
    encoded: u64,
    reused: u64,
}

fn write_frames(
    writer: &mut Writer,
    frames: Vec<EncodedFrame>,
    fps: f64,
    counts: &mut Counts,
) -> ReelkitResult<()> {
    for frame in frames {
        writer.write_frame(
            DcpTime::from_frames(frame.frame, fps),
            frame.eyes,
            &frame.source_hash,
            &frame.data,
        )?;
        if frame.reused {
            counts.reused += 1;
        } else {
            counts.encoded += 1;
        }
    }
    Ok(())
}
