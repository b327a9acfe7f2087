//! Examining content before it is placed.
//!
//! An [`Examiner`] reports what a source actually contains; the result is
//! applied to a [`Content`] before it is added to a playlist.

use reelkit_common::error::ReelkitResult;
use reelkit_common::time::ContentTime;

use crate::content::{AudioStream, Content};

/// Frames inspected for the pull-down pattern.
pub const PULLDOWN_CHECK_FRAMES: usize = 16;

/// Rate of 2:3 pulled-down film material.
pub const PULLDOWN_RATE: f64 = 24_000.0 / 1001.0;

const PULLDOWN_PATTERNS: [&str; 2] = ["T2T3B2B3T2T3B2B3", "B2B3T2T3B2B3T2T3"];

/// Field flags of one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags {
    pub top_field_first: bool,
    pub repeat_first_field: bool,
}

/// What an examiner found in a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Examination {
    pub length: ContentTime,
    pub video_frame_rate: Option<f64>,
    /// `(channels, sample_rate)` of the audio stream, if any.
    pub audio: Option<(usize, u32)>,
    /// Field flags of the first frames, for pull-down detection.
    pub field_flags: Vec<FieldFlags>,
}

/// Reports native properties of a content source.
pub trait Examiner {
    fn examine(&self, content: &Content) -> ReelkitResult<Examination>;
}

/// Two characters per frame: `T`/`B` for field order, then `3`/`2` for
/// whether the first field repeats.
pub fn temporal_reference(flags: &[FieldFlags]) -> String {
    flags
        .iter()
        .take(PULLDOWN_CHECK_FRAMES)
        .flat_map(|f| {
            [
                if f.top_field_first { 'T' } else { 'B' },
                if f.repeat_first_field { '3' } else { '2' },
            ]
        })
        .collect()
}

/// Best-effort detection of soft 2:3 pull-down.
///
/// Anything that does not match the known cadence is simply "not detected".
pub fn detect_pulldown(flags: &[FieldFlags]) -> bool {
    let reference = temporal_reference(flags);
    PULLDOWN_PATTERNS.iter().any(|p| reference.contains(p))
}

impl Examination {
    pub fn pulldown(&self) -> bool {
        detect_pulldown(&self.field_flags)
    }

    /// The rate the content should be treated as having.
    pub fn effective_video_frame_rate(&self) -> Option<f64> {
        if self.pulldown() {
            Some(PULLDOWN_RATE)
        } else {
            self.video_frame_rate
        }
    }

    /// Copy the findings into `content`, setting up a default audio mapping
    /// onto `output_channels`.
    pub fn apply_to(&self, content: &mut Content, output_channels: usize) {
        content.length = self.length;
        if content.is_video() || self.video_frame_rate.is_some() {
            content.video_frame_rate = self.effective_video_frame_rate();
            if self.pulldown() {
                tracing::info!(content = %content.name, "Treating content as 2:3 pull-down");
            }
        }
        if let Some((channels, sample_rate)) = self.audio {
            let keep_gain = content.audio.as_ref().map(|a| (a.gain_db, a.delay_ms));
            let mut stream =
                AudioStream::new(channels, sample_rate, output_channels, content.file_path());
            if let Some((gain_db, delay_ms)) = keep_gain {
                stream.gain_db = gain_db;
                stream.delay_ms = delay_ms;
            }
            content.audio = Some(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentKind, ContentSource};

    fn flags(pattern: &str) -> Vec<FieldFlags> {
        let chars: Vec<char> = pattern.chars().collect();
        chars
            .chunks(2)
            .map(|pair| FieldFlags {
                top_field_first: pair[0] == 'T',
                repeat_first_field: pair[1] == '3',
            })
            .collect()
    }

    #[test]
    fn test_pulldown_cadence_detected() {
        assert!(detect_pulldown(&flags("T2T3B2B3T2T3B2B3")));
        assert!(detect_pulldown(&flags("T2T2B2B3T2T3B2B3T2T3")));
    }

    #[test]
    fn test_progressive_not_detected() {
        assert!(!detect_pulldown(&flags("T2T2T2T2T2T2T2T2T2T2")));
        assert!(!detect_pulldown(&[]));
    }

    #[test]
    fn test_only_first_frames_considered() {
        let mut long = flags(&"T2".repeat(PULLDOWN_CHECK_FRAMES));
        long.extend(flags("T2T3B2B3T2T3B2B3"));
        assert!(!detect_pulldown(&long));
    }

    #[test]
    fn test_apply_sets_pulldown_rate_and_mapping() {
        let mut content = Content::new(
            "telecine_C_.mpg",
            ContentKind::Video,
            ContentSource::File {
                path: "telecine_C_.mpg".into(),
            },
        );
        let examination = Examination {
            length: ContentTime::from_seconds(10.0),
            video_frame_rate: Some(29.97),
            audio: Some((1, 48_000)),
            field_flags: flags("B2B3T2T3B2B3T2T3"),
        };
        examination.apply_to(&mut content, 6);

        assert_eq!(content.video_frame_rate, Some(PULLDOWN_RATE));
        assert_eq!(content.length, ContentTime::from_seconds(10.0));
        let audio = content.audio.expect("audio stream");
        assert_eq!(audio.mapping.mapped_output_channels(), vec![2]);
    }

    #[test]
    fn test_apply_keeps_soundtrack_rate() {
        let mut soundtrack = Content::new(
            "film.wav",
            ContentKind::Audio,
            ContentSource::File {
                path: "film.wav".into(),
            },
        );
        let examination = Examination {
            length: ContentTime::from_seconds(2.0),
            video_frame_rate: Some(25.0),
            audio: Some((2, 48_000)),
            field_flags: vec![],
        };
        examination.apply_to(&mut soundtrack, 6);
        assert_eq!(soundtrack.video_frame_rate, Some(25.0));

        let mut bare = soundtrack.clone();
        bare.video_frame_rate = None;
        Examination {
            video_frame_rate: None,
            ..examination
        }
        .apply_to(&mut bare, 6);
        assert_eq!(bare.video_frame_rate, None);
    }
}
