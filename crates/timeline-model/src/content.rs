//! Placed media sources.
//!
//! A [`Content`] is one piece of media positioned on the output timeline. Its
//! native timing (length, trims, frame rate) is kept in [`ContentTime`]; the
//! output span it covers is derived from those through a [`FrameRateChange`].

use std::fmt;
use std::path::{Path, PathBuf};

use reelkit_common::time::{ContentTime, DcpTime, FrameRateChange, Period};
use serde::{Deserialize, Serialize};

use crate::audio_mapping::AudioMapping;

/// Playlist-assigned identity of a piece of content.
///
/// Ids are handed out in insertion order, so they double as the tie-breaker
/// for content placed at the same position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The media kind a piece of content contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Audio,
    Text,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Audio => "audio",
            ContentKind::Text => "text",
        }
    }
}

/// Where a piece of content's media comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSource {
    /// A file (or pre-packaged asset directory) handled by an external decoder.
    File { path: PathBuf },
    /// Media synthesized on the fly.
    Generated { generator: Generator },
}

/// Synthetic media, used for slates, tests, and line-up material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Generator {
    /// Solid colour frames.
    Colour { r: u8, g: u8, b: u8 },
    /// Sine tone on every input channel.
    Tone { frequency: f64, amplitude: f32 },
    /// Digital silence.
    Silence,
    /// A single caption spanning the whole content.
    Text {
        text: String,
        v_align: VAlign,
        v_position: f64,
    },
}

/// Stereoscopic tagging of a video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFrameType {
    #[default]
    TwoD,
    ThreeDLeft,
    ThreeDRight,
    /// Left and right frames interleaved in one stream; the frame rate is
    /// the per-eye rate.
    ThreeDAlternate,
}

impl VideoFrameType {
    /// Whether this and `other` form a left/right pair that may coincide.
    pub fn pairs_with(self, other: VideoFrameType) -> bool {
        matches!(
            (self, other),
            (VideoFrameType::ThreeDLeft, VideoFrameType::ThreeDRight)
                | (VideoFrameType::ThreeDRight, VideoFrameType::ThreeDLeft)
        )
    }
}

/// Vertical anchoring of a caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    Center,
    Bottom,
}

/// A caption span in native content time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub from: ContentTime,
    pub to: ContentTime,
    pub text: String,
    pub v_align: VAlign,
    /// Fraction of the picture height from the anchor edge.
    pub v_position: f64,
}

/// Audio stream properties of a piece of audio content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub channels: usize,
    pub sample_rate: u32,
    /// Gain applied on mix, in dB.
    #[serde(default)]
    pub gain_db: f64,
    /// Shift of the stream against its position, in milliseconds.
    #[serde(default)]
    pub delay_ms: i64,
    pub mapping: AudioMapping,
}

impl AudioStream {
    /// A stream with the default mapping onto `output_channels`.
    pub fn new(
        channels: usize,
        sample_rate: u32,
        output_channels: usize,
        filename: Option<&Path>,
    ) -> Self {
        let mut mapping = AudioMapping::new(channels, output_channels);
        mapping.make_default(filename);
        Self {
            channels,
            sample_rate,
            gain_db: 0.0,
            delay_ms: 0,
            mapping,
        }
    }

    /// Linear gain factor for `gain_db`.
    pub fn linear_gain(&self) -> f32 {
        10f64.powf(self.gain_db / 20.0) as f32
    }

    pub fn delay(&self) -> DcpTime {
        DcpTime::new(self.delay_ms * reelkit_common::time::HZ / 1000)
    }
}

/// A placed media source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Assigned by the playlist on insertion.
    #[serde(default)]
    pub id: ContentId,

    pub name: String,

    pub source: ContentSource,

    pub kind: ContentKind,

    /// Start on the output timeline.
    #[serde(default)]
    pub position: DcpTime,

    /// Native length before trimming.
    pub length: ContentTime,

    #[serde(default)]
    pub trim_start: ContentTime,

    #[serde(default)]
    pub trim_end: ContentTime,

    /// Native video frame rate; `None` for content without pictures.
    #[serde(default)]
    pub video_frame_rate: Option<f64>,

    #[serde(default)]
    pub video_frame_type: VideoFrameType,

    #[serde(default)]
    pub audio: Option<AudioStream>,

    /// Include the pre-packaged asset by pointer instead of re-encoding it.
    #[serde(default)]
    pub reference: bool,

    /// Output durations of the reels of the pre-packaged asset this content
    /// was taken from; empty for anything that is not a package.
    #[serde(default)]
    pub packaged_reels: Vec<DcpTime>,

    /// Cleared by pre-flight when the source cannot be found.
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl Content {
    pub fn new(name: impl Into<String>, kind: ContentKind, source: ContentSource) -> Self {
        Self {
            id: ContentId::default(),
            name: name.into(),
            source,
            kind,
            position: DcpTime::ZERO,
            length: ContentTime::ZERO,
            trim_start: ContentTime::ZERO,
            trim_end: ContentTime::ZERO,
            video_frame_rate: None,
            video_frame_type: VideoFrameType::TwoD,
            audio: None,
            reference: false,
            packaged_reels: vec![],
            valid: true,
        }
    }

    /// Solid colour video of `frames` frames at `rate`.
    pub fn colour(name: impl Into<String>, rgb: (u8, u8, u8), frames: i64, rate: f64) -> Self {
        let (r, g, b) = rgb;
        Self::new(
            name,
            ContentKind::Video,
            ContentSource::Generated {
                generator: Generator::Colour { r, g, b },
            },
        )
        .with_length(ContentTime::from_frames(frames, rate))
        .with_video_rate(rate)
    }

    /// Sine tone on `channels` channels.
    pub fn tone(
        name: impl Into<String>,
        frequency: f64,
        length: ContentTime,
        channels: usize,
        sample_rate: u32,
        output_channels: usize,
    ) -> Self {
        Self::new(
            name,
            ContentKind::Audio,
            ContentSource::Generated {
                generator: Generator::Tone {
                    frequency,
                    amplitude: 0.5,
                },
            },
        )
        .with_length(length)
        .with_audio(AudioStream::new(
            channels,
            sample_rate,
            output_channels,
            None,
        ))
    }

    /// A caption shown for `length`.
    pub fn caption(
        name: impl Into<String>,
        text: impl Into<String>,
        v_align: VAlign,
        v_position: f64,
        length: ContentTime,
    ) -> Self {
        Self::new(
            name,
            ContentKind::Text,
            ContentSource::Generated {
                generator: Generator::Text {
                    text: text.into(),
                    v_align,
                    v_position,
                },
            },
        )
        .with_length(length)
    }

    pub fn at(mut self, position: DcpTime) -> Self {
        self.position = position;
        self
    }

    pub fn with_length(mut self, length: ContentTime) -> Self {
        self.length = length;
        self
    }

    pub fn with_trim(mut self, start: ContentTime, end: ContentTime) -> Self {
        self.trim_start = start;
        self.trim_end = end;
        self
    }

    pub fn with_video_rate(mut self, rate: f64) -> Self {
        self.video_frame_rate = Some(rate);
        self
    }

    pub fn with_frame_type(mut self, frame_type: VideoFrameType) -> Self {
        self.video_frame_type = frame_type;
        self
    }

    pub fn with_audio(mut self, audio: AudioStream) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Mark as coming from a pre-packaged asset with the given reel durations.
    pub fn packaged(mut self, reels: Vec<DcpTime>) -> Self {
        self.packaged_reels = reels;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == ContentKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == ContentKind::Audio
    }

    pub fn is_text(&self) -> bool {
        self.kind == ContentKind::Text
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            ContentSource::File { path } => Some(path),
            ContentSource::Generated { .. } => None,
        }
    }

    /// How this content's timing maps onto an output running at `output_fps`.
    ///
    /// Any content carrying a native frame rate follows it, so a soundtrack
    /// or caption track timed against its picture is sped up with it.
    pub fn frame_rate_change(&self, output_fps: f64) -> FrameRateChange {
        match self.video_frame_rate {
            Some(rate) if rate > 0.0 => FrameRateChange::new(rate, output_fps),
            _ => FrameRateChange::identity(output_fps),
        }
    }

    /// Native length left after trimming (never negative).
    pub fn trimmed_length(&self) -> ContentTime {
        let remaining = self.length - self.trim_start - self.trim_end;
        remaining.max(ContentTime::ZERO)
    }

    /// Output duration, rounded up to a whole output frame.
    pub fn full_length(&self, output_fps: f64) -> DcpTime {
        let frc = self.frame_rate_change(output_fps);
        DcpTime::from_content(self.trimmed_length(), &frc).ceil(output_fps)
    }

    pub fn end(&self, output_fps: f64) -> DcpTime {
        self.position + self.full_length(output_fps)
    }

    /// Output span this content is placed over (audio delay not applied).
    pub fn period(&self, output_fps: f64) -> Period {
        Period::new(self.position, self.end(output_fps))
    }

    /// Output span this content actually sounds or shows over.
    pub fn output_period(&self, output_fps: f64) -> Period {
        let delay = self
            .audio
            .as_ref()
            .filter(|_| self.is_audio())
            .map(AudioStream::delay)
            .unwrap_or(DcpTime::ZERO);
        let period = self.period(output_fps);
        Period::new(period.from + delay, period.to + delay)
    }

    /// Output time of a native content time, per
    /// `position + (native − trim_start) / speed_up`.
    pub fn dcp_time(&self, native: ContentTime, output_fps: f64) -> DcpTime {
        let frc = self.frame_rate_change(output_fps);
        self.position + DcpTime::from_content(native - self.trim_start, &frc)
    }

    /// Native content time shown at output time `time` (clamped to the trim).
    pub fn content_time(&self, time: DcpTime, output_fps: f64) -> ContentTime {
        let frc = self.frame_rate_change(output_fps);
        let offset = (time - self.position).max(DcpTime::ZERO);
        self.trim_start + ContentTime::from_dcp(offset, &frc)
    }

    /// Whether the source is a pre-packaged asset used whole.
    pub fn is_whole_package(&self, output_fps: f64) -> bool {
        if self.packaged_reels.is_empty()
            || self.trim_start != ContentTime::ZERO
            || self.trim_end != ContentTime::ZERO
        {
            return false;
        }
        let total = self
            .packaged_reels
            .iter()
            .fold(DcpTime::ZERO, |acc, reel| acc + *reel);
        total == self.full_length(output_fps)
    }

    /// Output periods of the packaged reels, laid from this content's position.
    pub fn packaged_reel_periods(&self) -> Vec<Period> {
        let mut from = self.position;
        self.packaged_reels
            .iter()
            .map(|duration| {
                let period = Period::new(from, from + *duration);
                from = period.to;
                period
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_length_rounds_up_to_output_frame() {
        // 25 fps content on a 24 fps timeline plays frame-for-frame.
        let content = Content::colour("pal", (0, 0, 0), 50, 25.0);
        assert_eq!(content.full_length(24.0), DcpTime::from_frames(50, 24.0));

        let odd = Content::new(
            "odd",
            ContentKind::Audio,
            ContentSource::Generated {
                generator: Generator::Silence,
            },
        )
        .with_length(ContentTime::new(4001));
        assert_eq!(odd.full_length(24.0), DcpTime::new(8000));
    }

    #[test]
    fn test_trim_shortens_and_offsets() {
        let content = Content::colour("c", (10, 10, 10), 48, 24.0)
            .at(DcpTime::from_seconds(1.0))
            .with_trim(ContentTime::from_seconds(0.5), ContentTime::ZERO);
        assert_eq!(content.full_length(24.0), DcpTime::from_seconds(1.5));
        assert_eq!(
            content.dcp_time(ContentTime::from_seconds(0.5), 24.0),
            DcpTime::from_seconds(1.0)
        );
        assert_eq!(
            content.content_time(DcpTime::from_seconds(2.0), 24.0),
            ContentTime::from_seconds(1.5)
        );
    }

    #[test]
    fn test_skip_rate_maps_native_times() {
        let content = Content::colour("fifty", (0, 0, 0), 100, 50.0);
        // 100 frames at 50 fps is 2 s; skipping keeps the duration.
        assert_eq!(content.full_length(25.0), DcpTime::from_seconds(2.0));
        assert_eq!(
            content.dcp_time(ContentTime::from_frames(50, 50.0), 25.0),
            DcpTime::from_seconds(1.0)
        );
    }

    #[test]
    fn test_soundtrack_sped_up_with_its_picture() {
        let picture = Content::colour("pal", (0, 0, 0), 50, 25.0);
        let soundtrack = Content::tone("pal", 440.0, ContentTime::from_seconds(2.0), 1, 48_000, 6)
            .with_video_rate(25.0);
        assert_eq!(soundtrack.end(24.0), picture.end(24.0));
        assert_eq!(soundtrack.end(24.0), DcpTime::new(200_000));

        let plain = Content::tone("plain", 440.0, ContentTime::from_seconds(2.0), 1, 48_000, 6);
        assert_eq!(plain.end(24.0), DcpTime::from_seconds(2.0));
    }

    #[test]
    fn test_audio_delay_shifts_output_period() {
        let mut content = Content::tone("t", 440.0, ContentTime::from_seconds(1.0), 1, 48_000, 6);
        if let Some(audio) = content.audio.as_mut() {
            audio.delay_ms = 500;
        }
        let period = content.output_period(24.0);
        assert_eq!(period.from, DcpTime::from_seconds(0.5));
        assert_eq!(period.to, DcpTime::from_seconds(1.5));
    }

    #[test]
    fn test_whole_package_detection() {
        let content = Content::colour("pkg", (0, 0, 0), 48, 24.0)
            .packaged(vec![DcpTime::from_seconds(1.0), DcpTime::from_seconds(1.0)]);
        assert!(content.is_whole_package(24.0));

        let trimmed = content
            .clone()
            .with_trim(ContentTime::from_seconds(0.5), ContentTime::ZERO);
        assert!(!trimmed.is_whole_package(24.0));
        assert_eq!(content.packaged_reel_periods().len(), 2);
    }

    #[test]
    fn test_gain_conversion() {
        let mut stream = AudioStream::new(2, 48_000, 6, None);
        assert!((stream.linear_gain() - 1.0).abs() < 1e-6);
        stream.gain_db = -6.0;
        assert!((stream.linear_gain() - 0.501_187).abs() < 1e-4);
    }
}
