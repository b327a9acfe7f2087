//! Flag content to be included by pointer.

use std::path::PathBuf;

use reelkit_player::check_reference;
use reelkit_timeline_model::{ContentId, LoadedProject};

pub fn run(path: PathBuf, id: u64, reference: bool) -> anyhow::Result<()> {
    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let id = ContentId(id);

    if reference {
        let snapshot = project.project.playlist.snapshot();
        check_reference(&snapshot, &project.project.settings, id)
            .map_err(|refusal| anyhow::anyhow!("Cannot reference content {id}: {refusal}"))?;
    }

    project
        .project
        .playlist
        .set_reference(id, reference)
        .map_err(|e| anyhow::anyhow!("Failed to update content: {e}"))?;
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    if reference {
        println!("Content {id} will be included by reference");
    } else {
        println!("Content {id} will be re-encoded");
    }
    Ok(())
}
