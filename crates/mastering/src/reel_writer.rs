//! Writing one reel.
//!
//! A reel directory holds the picture asset and its index, the sound asset,
//! caption entries, and a `reel.json` summary. Pictures and their index are
//! written to partial files that replace the previous asset and index only on
//! [`ReelWriter::finish`]; until then the previous pair stays readable for
//! reuse, and a run that stops early leaves it untouched.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::{DcpTime, Period};
use reelkit_player::{AudioBuffers, Eyes, ReferencedAsset, TextUnit};
use reelkit_timeline_model::{ContentId, ContentKind, ProjectSettings};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::frame_info::{slot, FrameInfo, FrameInfoFile};

pub const PICTURE_ASSET: &str = "picture.asset";
pub const PICTURE_PARTIAL: &str = "picture.partial";
pub const PICTURE_INFO: &str = "picture.info";
pub const PICTURE_INFO_PARTIAL: &str = "picture.info.partial";
pub const SOUND_ASSET: &str = "sound.pcm";
pub const SOUND_PARTIAL: &str = "sound.partial";
pub const TEXT_FILE: &str = "text.json";
pub const REEL_FILE: &str = "reel.json";

/// Full scale of a signed 24-bit sample.
const PCM_24_MAX: f32 = 8_388_607.0;

/// Directory name for a reel covering `period`.
pub fn directory_name(period: &Period) -> String {
    format!("reel-{}-{}", period.from.get(), period.to.get())
}

/// Captions shown unchanged over `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub from: DcpTime,
    pub to: DcpTime,
    pub units: Vec<TextUnit>,
}

/// A packaged asset this reel points at instead of carrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelReference {
    pub content: ContentId,
    pub kind: ContentKind,
    pub name: String,
    pub source: Option<PathBuf>,
    /// The packaged reel's output period.
    pub period: Period,
}

impl ReelReference {
    pub fn new(asset: &ReferencedAsset, period: Period) -> Self {
        Self {
            content: asset.content,
            kind: asset.kind,
            name: asset.name.clone(),
            source: asset.source.clone(),
            period,
        }
    }
}

/// What a finished reel contains; written as `reel.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReelSummary {
    pub index: usize,
    pub directory: String,
    pub period: Period,
    pub frames: i64,
    /// SHA-256 over the source hashes of every picture, in frame order.
    pub picture_id: String,
    pub picture_bytes: u64,
    /// SHA-256 of the PCM; `None` when the reel carries no sound.
    pub sound_id: Option<String>,
    pub sound_samples: u64,
    pub text_entries: usize,
    pub referenced: Vec<ReelReference>,
}

pub struct ReelWriter {
    index: usize,
    period: Period,
    fps: f64,
    channels: usize,
    dir: PathBuf,
    info: FrameInfoFile,
    /// The previous run's index; only ever read.
    previous_info: Option<FrameInfoFile>,
    picture: Option<BufWriter<File>>,
    picture_bytes: u64,
    /// The previous run's asset, opened on first reuse.
    previous: Option<File>,
    previous_opened: bool,
    hashes: BTreeMap<u64, String>,
    sound: Option<BufWriter<File>>,
    sound_hash: Sha256,
    sound_samples: u64,
    text: Vec<TextEntry>,
    referenced: Vec<ReelReference>,
    finished: bool,
}

fn write_error(path: &Path) -> impl Fn(std::io::Error) -> ReelkitError + '_ {
    move |e| ReelkitError::write(path, e.to_string())
}

fn create(path: &Path) -> ReelkitResult<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(write_error(path))
}

fn remove_if_present(path: &Path) -> ReelkitResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ReelkitError::write(path, e.to_string())),
    }
}

impl ReelWriter {
    pub fn create(
        root: &Path,
        index: usize,
        period: Period,
        settings: &ProjectSettings,
    ) -> ReelkitResult<Self> {
        let dir = root.join(directory_name(&period));
        std::fs::create_dir_all(&dir).map_err(write_error(&dir))?;

        let previous_info = FrameInfoFile::open_existing(dir.join(PICTURE_INFO))?;
        let info = FrameInfoFile::create(dir.join(PICTURE_INFO_PARTIAL))?;
        let picture = create(&dir.join(PICTURE_PARTIAL))?;
        let sound = create(&dir.join(SOUND_PARTIAL))?;

        tracing::debug!(reel = index, dir = %dir.display(), "Opened reel");
        Ok(Self {
            index,
            period,
            fps: settings.fps(),
            channels: settings.audio_channels,
            dir,
            info,
            previous_info,
            picture: Some(picture),
            picture_bytes: 0,
            previous: None,
            previous_opened: false,
            hashes: BTreeMap::new(),
            sound: Some(sound),
            sound_hash: Sha256::new(),
            sound_samples: 0,
            text: vec![],
            referenced: vec![],
            finished: false,
        })
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn local_frame(&self, time: DcpTime) -> i64 {
        (time - self.period.from).frames_round(self.fps)
    }

    /// Encoded bytes from the previous run for this picture, if its source
    /// hash is unchanged.
    pub fn existing(
        &mut self,
        time: DcpTime,
        eyes: Eyes,
        hash: &str,
    ) -> ReelkitResult<Option<Vec<u8>>> {
        let frame = self.local_frame(time);
        let Some(previous_info) = self.previous_info.as_mut() else {
            return Ok(None);
        };
        let Some(info) = previous_info.read(frame, eyes)? else {
            return Ok(None);
        };
        if info.hash != hash {
            return Ok(None);
        }

        if !self.previous_opened {
            self.previous_opened = true;
            self.previous = File::open(self.dir.join(PICTURE_ASSET)).ok();
        }
        let Some(previous) = self.previous.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; info.size as usize];
        let read = previous
            .seek(SeekFrom::Start(info.offset))
            .and_then(|_| previous.read_exact(&mut data));
        match read {
            Ok(()) => Ok(Some(data)),
            Err(e) => {
                tracing::warn!(reel = self.index, frame, error = %e, "Previous picture unreadable; re-encoding");
                Ok(None)
            }
        }
    }

    pub fn write_frame(
        &mut self,
        time: DcpTime,
        eyes: Eyes,
        hash: &str,
        data: &[u8],
    ) -> ReelkitResult<()> {
        let frame = self.local_frame(time);
        let partial = self.dir.join(PICTURE_PARTIAL);
        let picture = self
            .picture
            .as_mut()
            .ok_or_else(|| ReelkitError::write(&partial, "reel already finished"))?;
        picture.write_all(data).map_err(write_error(&partial))?;

        self.info.write(
            frame,
            eyes,
            &FrameInfo {
                offset: self.picture_bytes,
                size: data.len() as u64,
                hash: hash.to_string(),
            },
        )?;
        self.hashes.insert(slot(frame, eyes), hash.to_string());
        self.picture_bytes += data.len() as u64;
        Ok(())
    }

    /// Append sound as 24-bit little-endian interleaved PCM.
    pub fn write_audio(&mut self, buffers: &AudioBuffers) -> ReelkitResult<()> {
        if buffers.frames() == 0 {
            return Ok(());
        }
        if buffers.channels() != self.channels {
            return Err(ReelkitError::write(
                self.dir.join(SOUND_PARTIAL),
                format!(
                    "{} channel audio written to a {} channel reel",
                    buffers.channels(),
                    self.channels
                ),
            ));
        }

        let mut bytes = Vec::with_capacity(buffers.frames() * buffers.channels() * 3);
        for sample in buffers.interleaved() {
            let value = (sample.clamp(-1.0, 1.0) * PCM_24_MAX).round() as i32;
            bytes.extend_from_slice(&value.to_le_bytes()[0..3]);
        }

        let partial = self.dir.join(SOUND_PARTIAL);
        let sound = self
            .sound
            .as_mut()
            .ok_or_else(|| ReelkitError::write(&partial, "reel already finished"))?;
        sound.write_all(&bytes).map_err(write_error(&partial))?;
        self.sound_hash.update(&bytes);
        self.sound_samples += buffers.frames() as u64;
        Ok(())
    }

    /// Record captions over `[from, to)`, extending the previous entry when
    /// it carries identical units and ends at `from`.
    pub fn write_text(&mut self, from: DcpTime, to: DcpTime, units: &[TextUnit]) {
        if units.is_empty() {
            return;
        }
        if let Some(last) = self.text.last_mut() {
            if last.to == from && last.units == units {
                last.to = to;
                return;
            }
        }
        self.text.push(TextEntry {
            from,
            to,
            units: units.to_vec(),
        });
    }

    pub fn add_reference(&mut self, reference: ReelReference) {
        self.referenced.push(reference);
    }

    /// Close the reel: replace the previous assets and write the summaries.
    ///
    /// The old index goes first and the new one is published last, so an
    /// interruption in between leaves no index rather than a mismatched one.
    pub fn finish(&mut self) -> ReelkitResult<ReelSummary> {
        if self.finished {
            return Err(ReelkitError::write(&self.dir, "reel already finished"));
        }
        let frames = self.period.duration().frames_round(self.fps);

        let partial = self.dir.join(PICTURE_PARTIAL);
        if let Some(mut picture) = self.picture.take() {
            picture
                .flush()
                .and_then(|()| picture.get_ref().sync_all())
                .map_err(write_error(&partial))?;
        }
        self.info.finish(frames)?;
        self.previous = None;
        self.previous_info = None;

        let index = self.dir.join(PICTURE_INFO);
        remove_if_present(&index)?;
        let asset = self.dir.join(PICTURE_ASSET);
        std::fs::rename(&partial, &asset).map_err(write_error(&asset))?;
        std::fs::rename(self.dir.join(PICTURE_INFO_PARTIAL), &index)
            .map_err(write_error(&index))?;

        let partial = self.dir.join(SOUND_PARTIAL);
        if let Some(mut sound) = self.sound.take() {
            sound.flush().map_err(write_error(&partial))?;
        }
        let sound_asset = self.dir.join(SOUND_ASSET);
        let sound_id = if self.sound_samples > 0 {
            std::fs::rename(&partial, &sound_asset).map_err(write_error(&sound_asset))?;
            Some(format!("{:x}", self.sound_hash.clone().finalize()))
        } else {
            remove_if_present(&partial)?;
            remove_if_present(&sound_asset)?;
            None
        };

        let mut picture_hash = Sha256::new();
        for hash in self.hashes.values() {
            picture_hash.update(hash.as_bytes());
        }

        let summary = ReelSummary {
            index: self.index,
            directory: directory_name(&self.period),
            period: self.period,
            frames,
            picture_id: format!("{:x}", picture_hash.finalize()),
            picture_bytes: self.picture_bytes,
            sound_id,
            sound_samples: self.sound_samples,
            text_entries: self.text.len(),
            referenced: self.referenced.clone(),
        };

        let text_path = self.dir.join(TEXT_FILE);
        std::fs::write(&text_path, serde_json::to_vec_pretty(&self.text)?)
            .map_err(write_error(&text_path))?;
        let reel_path = self.dir.join(REEL_FILE);
        std::fs::write(&reel_path, serde_json::to_vec_pretty(&summary)?)
            .map_err(write_error(&reel_path))?;

        self.finished = true;
        tracing::info!(
            reel = self.index,
            frames,
            picture_bytes = self.picture_bytes,
            sound_samples = self.sound_samples,
            "Finished reel"
        );
        Ok(summary)
    }
}

impl Drop for ReelWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The previous asset and index stay for the next run to reuse.
        for name in [PICTURE_INFO_PARTIAL, PICTURE_PARTIAL, SOUND_PARTIAL] {
            if let Err(e) = remove_if_present(&self.dir.join(name)) {
                tracing::warn!(reel = self.index, error = %e, "Failed to clean up abandoned reel");
            }
        }
        tracing::debug!(reel = self.index, "Abandoned reel");
    }
}
