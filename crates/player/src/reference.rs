//! Including pre-packaged assets by pointer.
//!
//! Referenced content is never decoded. The player reports it and the writer
//! records a pointer to the packaged reels instead of re-encoding them.

use std::path::PathBuf;

use reelkit_common::time::Period;
use reelkit_timeline_model::{
    compute_reels, ContentId, ContentKind, PlaylistSnapshot, ProjectSettings,
};
use serde::{Deserialize, Serialize};

/// Why a piece of content cannot be referenced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceRefusal {
    #[error("content {0} is not in the playlist")]
    NotFound(ContentId),

    #[error("content {id} is not a whole pre-packaged asset")]
    NotWholePackage { id: ContentId },

    #[error("the reels of content {id} do not line up with whole output reels; split reels by video content")]
    ReelsMisaligned { id: ContentId },

    #[error("content {id} overlaps content {other} of the same kind")]
    Overlaps { id: ContentId, other: ContentId },

    #[error("content {id} is referenced but the other eye ({other}) is not")]
    EyesMismatch { id: ContentId, other: ContentId },
}

/// A packaged asset included by pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedAsset {
    pub content: ContentId,
    pub kind: ContentKind,
    pub name: String,
    pub source: Option<PathBuf>,
    /// Output periods of the packaged reels.
    pub reels: Vec<Period>,
}

/// Whether content `id` may be included by reference.
///
/// The check is made as though the content were already flagged, so reel
/// boundaries contributed by the package itself are taken into account.
pub fn check_reference(
    snapshot: &PlaylistSnapshot,
    settings: &ProjectSettings,
    id: ContentId,
) -> Result<(), ReferenceRefusal> {
    let content = snapshot.get(id).ok_or(ReferenceRefusal::NotFound(id))?;
    let fps = settings.fps();

    if !content.is_whole_package(fps) {
        return Err(ReferenceRefusal::NotWholePackage { id });
    }

    let period = content.period(fps);
    for other in snapshot.of_kind(content.kind).filter(|c| c.id != id) {
        if !other.period(fps).overlaps(&period) {
            continue;
        }
        let stereo_pair = settings.three_d
            && content
                .video_frame_type
                .pairs_with(other.video_frame_type);
        if !stereo_pair {
            return Err(ReferenceRefusal::Overlaps {
                id,
                other: other.id,
            });
        }
        if !other.reference {
            return Err(ReferenceRefusal::EyesMismatch {
                id,
                other: other.id,
            });
        }
    }

    let flagged = snapshot.with_edit(id, |c| c.reference = true);
    let reels = compute_reels(&flagged, settings);
    let aligned = content
        .packaged_reel_periods()
        .iter()
        .all(|packaged| reels.contains(packaged));
    if !aligned {
        return Err(ReferenceRefusal::ReelsMisaligned { id });
    }

    Ok(())
}

/// Every flagged piece of content, as it will be recorded by the writer.
pub fn referenced_assets(snapshot: &PlaylistSnapshot) -> Vec<ReferencedAsset> {
    snapshot
        .content()
        .iter()
        .filter(|c| c.reference)
        .map(|c| ReferencedAsset {
            content: c.id,
            kind: c.kind,
            name: c.name.clone(),
            source: c.file_path().map(|p| p.to_path_buf()),
            reels: c.packaged_reel_periods(),
        })
        .collect()
}
