//! Splitting the output timeline into reels.

use reelkit_common::time::{DcpTime, Period};
use serde::{Deserialize, Serialize};

use crate::content::ContentKind;
use crate::playlist::PlaylistSnapshot;
use crate::project::ProjectSettings;

/// Reel splitting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReelType {
    /// One reel for the whole timeline.
    #[default]
    Single,
    /// A boundary at every video content start and end, and at every reel
    /// boundary of a referenced package.
    ByVideoContent,
    /// Reels capped at `reel_length_bytes` given the picture bit rate.
    ByLength,
}

/// Frames that fit in a reel of `reel_length_bytes` at `bandwidth` bits per
/// second and `fps` frames per second. Never less than one.
pub fn frames_per_reel(reel_length_bytes: u64, bandwidth: u64, fps: u32) -> i64 {
    if bandwidth == 0 {
        return i64::MAX;
    }
    let bits = reel_length_bytes as u128 * 8 * fps as u128;
    let frames = bits / bandwidth as u128;
    frames.clamp(1, i64::MAX as u128) as i64
}

/// The reels of a snapshot's timeline, in order and without gaps.
///
/// An empty timeline has no reels.
pub fn compute_reels(snapshot: &PlaylistSnapshot, settings: &ProjectSettings) -> Vec<Period> {
    let length = snapshot.length();
    if length <= DcpTime::ZERO {
        return vec![];
    }
    let fps = settings.video_frame_rate as f64;

    let reels = match settings.reel_type {
        ReelType::Single => vec![Period::new(DcpTime::ZERO, length)],
        ReelType::ByVideoContent => {
            let mut points = vec![DcpTime::ZERO, length];
            for content in snapshot.content() {
                if content.reference && !content.packaged_reels.is_empty() {
                    points.push(content.position);
                    points.extend(content.packaged_reel_periods().iter().map(|p| p.to));
                } else if content.kind == ContentKind::Video {
                    points.push(content.position);
                    points.push(content.end(fps));
                }
            }
            points.retain(|t| *t >= DcpTime::ZERO && *t <= length);
            points.sort();
            points.dedup();
            points
                .windows(2)
                .map(|pair| Period::new(pair[0], pair[1]))
                .collect()
        }
        ReelType::ByLength => {
            let frames = frames_per_reel(
                settings.reel_length_bytes,
                settings.j2k_bandwidth,
                settings.video_frame_rate,
            );
            let step = DcpTime::from_frames(frames, fps);
            let mut reels = vec![];
            let mut from = DcpTime::ZERO;
            while from < length {
                let to = (from + step).min(length);
                reels.push(Period::new(from, to));
                from = to;
            }
            reels
        }
    };

    tracing::debug!(
        policy = ?settings.reel_type,
        reels = reels.len(),
        length = length.get(),
        "Computed reels"
    );
    reels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::playlist::Playlist;

    fn settings(reel_type: ReelType) -> ProjectSettings {
        ProjectSettings {
            reel_type,
            ..ProjectSettings::default()
        }
    }

    fn two_videos() -> Playlist {
        let mut playlist = Playlist::new(24, false);
        playlist
            .add(Content::colour("a", (255, 0, 0), 72, 24.0))
            .unwrap();
        playlist
            .add(Content::colour("b", (0, 255, 0), 72, 24.0).at(DcpTime::new(288_000)))
            .unwrap();
        playlist
    }

    #[test]
    fn test_single_reel() {
        let reels = compute_reels(&two_videos().snapshot(), &settings(ReelType::Single));
        assert_eq!(reels, vec![Period::new(DcpTime::ZERO, DcpTime::new(576_000))]);
    }

    #[test]
    fn test_by_video_content() {
        let reels = compute_reels(
            &two_videos().snapshot(),
            &settings(ReelType::ByVideoContent),
        );
        assert_eq!(
            reels,
            vec![
                Period::new(DcpTime::ZERO, DcpTime::new(288_000)),
                Period::new(DcpTime::new(288_000), DcpTime::new(576_000)),
            ]
        );
    }

    #[test]
    fn test_by_video_content_absorbs_trailing_timeline() {
        let mut playlist = Playlist::new(24, false);
        playlist
            .add(Content::colour("a", (0, 0, 0), 24, 24.0).at(DcpTime::from_seconds(1.0)))
            .unwrap();
        playlist
            .add(Content::tone(
                "tail",
                440.0,
                reelkit_common::time::ContentTime::from_seconds(4.0),
                1,
                48_000,
                6,
            ))
            .unwrap();
        let reels = compute_reels(&playlist.snapshot(), &settings(ReelType::ByVideoContent));
        assert_eq!(
            reels,
            vec![
                Period::new(DcpTime::ZERO, DcpTime::from_seconds(1.0)),
                Period::new(DcpTime::from_seconds(1.0), DcpTime::from_seconds(2.0)),
                Period::new(DcpTime::from_seconds(2.0), DcpTime::from_seconds(4.0)),
            ]
        );
    }

    #[test]
    fn test_by_length() {
        let mut playlist = Playlist::new(24, false);
        playlist
            .add(Content::colour("long", (0, 0, 0), 144, 24.0))
            .unwrap();
        let settings = ProjectSettings {
            reel_type: ReelType::ByLength,
            reel_length_bytes: 31_253_154,
            j2k_bandwidth: 100_000_000,
            ..ProjectSettings::default()
        };
        let reels = compute_reels(&playlist.snapshot(), &settings);
        let ends: Vec<i64> = reels.iter().map(|r| r.to.frames_round(24.0)).collect();
        assert_eq!(ends, vec![60, 120, 144]);

        let bytes_per_frame = settings.j2k_bandwidth / 8 / 24;
        for reel in &reels {
            let frames = reel.duration().frames_round(24.0) as u64;
            assert!(frames * bytes_per_frame <= settings.reel_length_bytes);
        }
    }

    #[test]
    fn test_frames_per_reel_never_zero() {
        assert_eq!(frames_per_reel(1, 250_000_000, 24), 1);
        assert_eq!(frames_per_reel(31_253_154, 100_000_000, 24), 60);
        assert_eq!(frames_per_reel(u64::MAX, 1, 120), i64::MAX);
    }

    #[test]
    fn test_empty_timeline_has_no_reels() {
        let playlist = Playlist::new(24, false);
        for policy in [ReelType::Single, ReelType::ByVideoContent, ReelType::ByLength] {
            assert!(compute_reels(&playlist.snapshot(), &settings(policy)).is_empty());
        }
    }
}
