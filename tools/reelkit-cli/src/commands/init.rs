//! Initialize a new reelkit project.

use std::path::PathBuf;

use reelkit_common::config::AppConfig;
use reelkit_timeline_model::{LoadedProject, ProjectSettings, ReelType};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &AppConfig,
    name: String,
    output: PathBuf,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    three_d: bool,
    reels: String,
) -> anyhow::Result<()> {
    let reel_type = match reels.as_str() {
        "single" => ReelType::Single,
        "by-video-content" => ReelType::ByVideoContent,
        "by-length" => ReelType::ByLength,
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown reel split: {reels}. Use: single, by-video-content, by-length"
            ));
        }
    };

    let defaults = ProjectSettings::from_defaults(&config.defaults);
    let settings = ProjectSettings {
        video_frame_rate: fps.unwrap_or(defaults.video_frame_rate),
        width: width.unwrap_or(defaults.width),
        height: height.unwrap_or(defaults.height),
        three_d,
        reel_type,
        ..defaults
    };

    let project_dir = output.join(&name);
    println!("Creating project '{}' at {}", name, project_dir.display());

    let project = LoadedProject::create(&project_dir, &name, settings)
        .map_err(|e| anyhow::anyhow!("Failed to create project: {e}"))?;
    let s = &project.project.settings;

    println!("Project created successfully:");
    println!("  Directory: {}", project.root.display());
    println!("  Picture: {}x{} @ {}fps{}", s.width, s.height, s.video_frame_rate, if s.three_d { " (3D)" } else { "" });
    println!("  Sound: {} channels @ {} Hz", s.audio_channels, s.audio_sample_rate);
    println!("  Reels: {:?}", s.reel_type);

    Ok(())
}
