//! Show a project's playlist and reel split.

use std::path::PathBuf;

use reelkit_timeline_model::{compute_reels, LoadedProject};

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    let missing = project.project.playlist.preflight();
    let settings = &project.project.settings;
    let fps = settings.fps();
    let snapshot = project.project.playlist.snapshot();

    println!("Project: {}", project.project.name);
    println!("  Length: {:.3}s", snapshot.length().seconds());
    println!();

    println!("Content:");
    for content in project.project.playlist.content() {
        let period = content.period(fps);
        println!(
            "  [{}] {} ({}) {:.3}s - {:.3}s{}{}",
            content.id,
            content.name,
            content.kind.as_str(),
            period.from.seconds(),
            period.to.seconds(),
            if content.reference { " [referenced]" } else { "" },
            if content.valid { "" } else { " [missing]" },
        );
    }
    println!();

    let reels = compute_reels(&snapshot, settings);
    println!("Reels ({:?}):", settings.reel_type);
    for (index, reel) in reels.iter().enumerate() {
        println!(
            "  {}: {:.3}s - {:.3}s ({} frames)",
            index + 1,
            reel.from.seconds(),
            reel.to.seconds(),
            reel.duration().frames_round(fps)
        );
    }

    if !missing.is_empty() {
        println!("\n{} content source(s) missing; they are left out.", missing.len());
    }
    Ok(())
}
