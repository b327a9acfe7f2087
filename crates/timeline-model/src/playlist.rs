//! The ordered set of placed content.
//!
//! A [`Playlist`] is the sole owner of its [`Content`]. Consumers never read
//! it during a pass; they take a [`PlaylistSnapshot`], an immutable shared copy
//! that later edits cannot touch.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reelkit_common::error::ReelkitError;
use reelkit_common::time::{DcpTime, Period};
use serde::{Deserialize, Serialize};

use crate::content::{Content, ContentId, ContentKind, VideoFrameType};

/// Errors raised by playlist edits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaylistError {
    #[error("No content with id {0}")]
    NotFound(ContentId),

    #[error("Video content {first} and {second} overlap")]
    VideoOverlap { first: ContentId, second: ContentId },

    #[error("Left and right eye content {first} and {second} must cover the same span")]
    StereoMismatch { first: ContentId, second: ContentId },

    #[error("Content {id} is trimmed to nothing")]
    EmptyAfterTrim { id: ContentId },

    #[error("Content {id} must be placed at or after zero")]
    NegativePosition { id: ContentId },
}

impl From<PlaylistError> for ReelkitError {
    fn from(err: PlaylistError) -> Self {
        ReelkitError::playlist(err.to_string())
    }
}

/// Ordered, invariant-checked content collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    video_frame_rate: u32,
    three_d: bool,
    content: Vec<Content>,
    next_id: u64,
    #[serde(skip)]
    revision: u64,
}

/// Immutable view of the valid content of a playlist at one revision.
#[derive(Debug, Clone)]
pub struct PlaylistSnapshot {
    revision: u64,
    video_frame_rate: u32,
    three_d: bool,
    content: Vec<Content>,
}

impl Playlist {
    pub fn new(video_frame_rate: u32, three_d: bool) -> Self {
        Self {
            video_frame_rate: video_frame_rate.max(1),
            three_d,
            content: vec![],
            next_id: 1,
            revision: 0,
        }
    }

    pub fn video_frame_rate(&self) -> u32 {
        self.video_frame_rate
    }

    pub fn three_d(&self) -> bool {
        self.three_d
    }

    fn fps(&self) -> f64 {
        self.video_frame_rate as f64
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Content ordered by position, ties in insertion order.
    pub fn content(&self) -> &[Content] {
        &self.content
    }

    pub fn get(&self, id: ContentId) -> Option<&Content> {
        self.content.iter().find(|c| c.id == id)
    }

    /// Add content, snapping its position to an output frame.
    pub fn add(&mut self, mut content: Content) -> Result<ContentId, PlaylistError> {
        let id = ContentId(self.next_id);
        content.id = id;
        self.prepare(&mut content)?;
        self.check_overlaps(&content)?;

        self.next_id += 1;
        self.content.push(content);
        self.sort();
        self.bump();

        tracing::debug!(content = %id, revision = self.revision, "Added content");
        Ok(id)
    }

    pub fn remove(&mut self, id: ContentId) -> Option<Content> {
        let index = self.content.iter().position(|c| c.id == id)?;
        let removed = self.content.remove(index);
        self.bump();
        tracing::debug!(content = %id, revision = self.revision, "Removed content");
        Some(removed)
    }

    /// Apply an edit to one piece of content.
    ///
    /// The edit is rolled back if the result breaks a playlist invariant.
    pub fn modify<F>(&mut self, id: ContentId, edit: F) -> Result<(), PlaylistError>
    where
        F: FnOnce(&mut Content),
    {
        let index = self
            .content
            .iter()
            .position(|c| c.id == id)
            .ok_or(PlaylistError::NotFound(id))?;

        let mut edited = self.content[index].clone();
        edit(&mut edited);
        edited.id = id;
        self.prepare(&mut edited)?;
        self.check_overlaps(&edited)?;

        self.content[index] = edited;
        self.sort();
        self.bump();
        Ok(())
    }

    pub fn move_content(&mut self, id: ContentId, position: DcpTime) -> Result<(), PlaylistError> {
        self.modify(id, |c| c.position = position)
    }

    pub fn set_reference(&mut self, id: ContentId, reference: bool) -> Result<(), PlaylistError> {
        self.modify(id, |c| c.reference = reference)
    }

    /// End of the last content, rounded up to a whole output frame.
    pub fn length(&self) -> DcpTime {
        length_of(&self.content, self.fps())
    }

    /// Flag content whose file source is missing; returns the flagged ids.
    ///
    /// Flagged content stays in the playlist but is left out of snapshots.
    pub fn preflight(&mut self) -> Vec<ContentId> {
        let mut flagged = vec![];
        let mut changed = false;
        for content in &mut self.content {
            let valid = content.file_path().map_or(true, |path| path.exists());
            if !valid {
                tracing::warn!(
                    content = %content.id,
                    name = %content.name,
                    "Content source is missing"
                );
                flagged.push(content.id);
            }
            if content.valid != valid {
                content.valid = valid;
                changed = true;
            }
        }
        if changed {
            self.bump();
        }
        flagged
    }

    /// Freeze the valid content for one pass.
    pub fn snapshot(&self) -> Arc<PlaylistSnapshot> {
        Arc::new(PlaylistSnapshot {
            revision: self.revision,
            video_frame_rate: self.video_frame_rate,
            three_d: self.three_d,
            content: self.content.iter().filter(|c| c.valid).cloned().collect(),
        })
    }

    fn prepare(&self, content: &mut Content) -> Result<(), PlaylistError> {
        if content.position < DcpTime::ZERO {
            return Err(PlaylistError::NegativePosition { id: content.id });
        }
        if content.length > reelkit_common::time::ContentTime::ZERO
            && content.trimmed_length() == reelkit_common::time::ContentTime::ZERO
        {
            return Err(PlaylistError::EmptyAfterTrim { id: content.id });
        }
        content.position = content.position.round(self.fps());
        Ok(())
    }

    fn check_overlaps(&self, candidate: &Content) -> Result<(), PlaylistError> {
        if !candidate.is_video() {
            return Ok(());
        }
        let fps = self.fps();
        let period = candidate.period(fps);
        for other in self
            .content
            .iter()
            .filter(|c| c.is_video() && c.id != candidate.id)
        {
            if !other.period(fps).overlaps(&period) {
                continue;
            }
            let stereo_pair = self.three_d
                && candidate
                    .video_frame_type
                    .pairs_with(other.video_frame_type);
            if !stereo_pair {
                return Err(PlaylistError::VideoOverlap {
                    first: other.id,
                    second: candidate.id,
                });
            }
            if other.period(fps) != period {
                return Err(PlaylistError::StereoMismatch {
                    first: other.id,
                    second: candidate.id,
                });
            }
        }
        Ok(())
    }

    fn sort(&mut self) {
        self.content.sort_by_key(|c| (c.position, c.id));
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

fn length_of(content: &[Content], fps: f64) -> DcpTime {
    content
        .iter()
        .map(|c| c.end(fps))
        .max()
        .unwrap_or(DcpTime::ZERO)
        .ceil(fps)
}

impl PlaylistSnapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn video_frame_rate(&self) -> u32 {
        self.video_frame_rate
    }

    pub fn fps(&self) -> f64 {
        self.video_frame_rate as f64
    }

    pub fn three_d(&self) -> bool {
        self.three_d
    }

    /// Valid content in playlist order.
    pub fn content(&self) -> &[Content] {
        &self.content
    }

    pub fn get(&self, id: ContentId) -> Option<&Content> {
        self.content.iter().find(|c| c.id == id)
    }

    pub fn of_kind(&self, kind: ContentKind) -> impl Iterator<Item = &Content> {
        self.content.iter().filter(move |c| c.kind == kind)
    }

    pub fn length(&self) -> DcpTime {
        length_of(&self.content, self.fps())
    }

    /// Output periods covered by content of `kind`.
    pub fn coverage(&self, kind: ContentKind) -> Vec<Period> {
        let fps = self.fps();
        let periods: Vec<Period> = self.of_kind(kind).map(|c| c.output_period(fps)).collect();
        Period::coalesce(&periods)
    }

    /// Whether the snapshot carries left/right eye video.
    pub fn has_stereo_video(&self) -> bool {
        self.of_kind(ContentKind::Video).any(|c| {
            matches!(
                c.video_frame_type,
                VideoFrameType::ThreeDLeft
                    | VideoFrameType::ThreeDRight
                    | VideoFrameType::ThreeDAlternate
            )
        })
    }

    /// A copy with `edit` applied to content `id`, for what-if checks.
    pub fn with_edit<F>(&self, id: ContentId, edit: F) -> PlaylistSnapshot
    where
        F: FnOnce(&mut Content),
    {
        let mut copy = self.clone();
        if let Some(content) = copy.content.iter_mut().find(|c| c.id == id) {
            edit(content);
        }
        copy
    }
}

/// A playlist shared between an editor and any number of readers.
///
/// Writers take the lock only for the duration of an edit; readers take a
/// snapshot and never hold the lock while a pass runs.
#[derive(Debug, Clone)]
pub struct SharedPlaylist {
    inner: Arc<RwLock<Playlist>>,
}

impl SharedPlaylist {
    pub fn new(playlist: Playlist) -> Self {
        Self {
            inner: Arc::new(RwLock::new(playlist)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Playlist> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Playlist> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run an edit under the write lock.
    pub fn edit<R>(&self, edit: impl FnOnce(&mut Playlist) -> R) -> R {
        edit(&mut self.write())
    }

    pub fn snapshot(&self) -> Arc<PlaylistSnapshot> {
        self.read().snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentSource, Generator};
    use reelkit_common::time::ContentTime;

    fn video(frames: i64) -> Content {
        Content::colour("v", (0, 0, 0), frames, 24.0)
    }

    #[test]
    fn test_add_orders_by_position_then_insertion() {
        let mut playlist = Playlist::new(24, false);
        let late = playlist
            .add(video(24).at(DcpTime::from_seconds(5.0)))
            .unwrap();
        let early = playlist.add(video(24)).unwrap();
        let tone = playlist
            .add(Content::tone(
                "t",
                440.0,
                ContentTime::from_seconds(1.0),
                1,
                48_000,
                6,
            ))
            .unwrap();

        let order: Vec<ContentId> = playlist.content().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![early, tone, late]);
    }

    #[test]
    fn test_position_snapped_to_frame() {
        let mut playlist = Playlist::new(24, false);
        let id = playlist.add(video(24).at(DcpTime::new(4001))).unwrap();
        assert_eq!(playlist.get(id).unwrap().position, DcpTime::new(4000));
    }

    #[test]
    fn test_overlapping_video_rejected_in_2d() {
        let mut playlist = Playlist::new(24, false);
        playlist.add(video(48)).unwrap();
        let err = playlist
            .add(video(48).at(DcpTime::from_seconds(1.0)))
            .unwrap_err();
        assert!(matches!(err, PlaylistError::VideoOverlap { .. }));
        assert_eq!(playlist.content().len(), 1);
    }

    #[test]
    fn test_stereo_pair_may_coincide_in_3d() {
        let mut playlist = Playlist::new(24, true);
        playlist
            .add(video(48).with_frame_type(VideoFrameType::ThreeDLeft))
            .unwrap();
        playlist
            .add(video(48).with_frame_type(VideoFrameType::ThreeDRight))
            .unwrap();
        let third = playlist.add(video(48).with_frame_type(VideoFrameType::ThreeDLeft));
        assert!(third.is_err());
    }

    #[test]
    fn test_stereo_pair_must_coincide_exactly() {
        let mut playlist = Playlist::new(24, true);
        playlist
            .add(video(48).with_frame_type(VideoFrameType::ThreeDLeft))
            .unwrap();
        let shifted = playlist.add(
            video(48)
                .with_frame_type(VideoFrameType::ThreeDRight)
                .at(DcpTime::from_seconds(1.0)),
        );
        assert!(matches!(shifted, Err(PlaylistError::StereoMismatch { .. })));
        let shorter = playlist.add(video(24).with_frame_type(VideoFrameType::ThreeDRight));
        assert!(matches!(shorter, Err(PlaylistError::StereoMismatch { .. })));
        assert_eq!(playlist.content().len(), 1);
    }

    #[test]
    fn test_modify_rolls_back_on_violation() {
        let mut playlist = Playlist::new(24, false);
        let a = playlist.add(video(24)).unwrap();
        let b = playlist
            .add(video(24).at(DcpTime::from_seconds(2.0)))
            .unwrap();
        let revision = playlist.revision();

        assert!(playlist.move_content(b, DcpTime::from_seconds(0.5)).is_err());
        assert_eq!(playlist.get(b).unwrap().position, DcpTime::from_seconds(2.0));
        assert_eq!(playlist.revision(), revision);

        playlist.move_content(a, DcpTime::from_seconds(4.0)).unwrap();
        assert_eq!(playlist.content()[0].id, b);
        assert_eq!(playlist.length(), DcpTime::from_seconds(5.0));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_edits() {
        let shared = SharedPlaylist::new(Playlist::new(24, false));
        let id = shared.edit(|p| p.add(video(24))).unwrap();
        let snapshot = shared.snapshot();

        shared.edit(|p| p.remove(id));
        assert_eq!(snapshot.content().len(), 1);
        assert!(shared.snapshot().content().is_empty());
        assert!(shared.revision() > snapshot.revision());
    }

    #[test]
    fn test_preflight_flags_missing_files_only() {
        let mut playlist = Playlist::new(24, false);
        let missing = playlist
            .add(
                Content::new(
                    "gone",
                    ContentKind::Video,
                    ContentSource::File {
                        path: "/nonexistent/reelkit/clip.mov".into(),
                    },
                )
                .with_length(ContentTime::from_seconds(1.0))
                .with_video_rate(24.0),
            )
            .unwrap();
        let generated = playlist
            .add(
                Content::new(
                    "silence",
                    ContentKind::Audio,
                    ContentSource::Generated {
                        generator: Generator::Silence,
                    },
                )
                .with_length(ContentTime::from_seconds(1.0)),
            )
            .unwrap();

        assert_eq!(playlist.preflight(), vec![missing]);
        let snapshot = playlist.snapshot();
        assert!(snapshot.get(missing).is_none());
        assert!(snapshot.get(generated).is_some());
    }

    #[test]
    fn test_trimmed_to_nothing_rejected() {
        let mut playlist = Playlist::new(24, false);
        let err = playlist
            .add(video(24).with_trim(ContentTime::from_seconds(0.5), ContentTime::from_seconds(0.5)))
            .unwrap_err();
        assert!(matches!(err, PlaylistError::EmptyAfterTrim { .. }));
    }

    #[test]
    fn test_coverage_merges_periods() {
        let mut playlist = Playlist::new(24, false);
        playlist.add(video(24)).unwrap();
        playlist
            .add(video(24).at(DcpTime::from_seconds(1.0)))
            .unwrap();
        let coverage = playlist.snapshot().coverage(ContentKind::Video);
        assert_eq!(
            coverage,
            vec![Period::new(DcpTime::ZERO, DcpTime::from_seconds(2.0))]
        );
    }
}
