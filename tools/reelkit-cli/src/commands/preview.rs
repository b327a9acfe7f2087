//! Play a project through the read-ahead butler.

use std::path::PathBuf;

use reelkit_common::config::AppConfig;
use reelkit_common::time::DcpTime;
use reelkit_player::{
    Behaviour, Butler, ButlerConfig, Player, PlayerOptions, SyntheticDecoderFactory,
};
use reelkit_timeline_model::LoadedProject;

pub async fn run(config: &AppConfig, path: PathBuf, from: f64, frames: usize) -> anyhow::Result<()> {
    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    project.project.playlist.preflight();
    let snapshot = project.project.playlist.snapshot();
    let settings = project.project.settings.clone();
    let multiplier = config.encoding.frames_in_memory_multiplier;

    println!(
        "Previewing {} from {from:.3}s ({} frames)",
        project.project.name, frames
    );

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let player = Player::new(
            snapshot,
            &SyntheticDecoderFactory,
            settings.clone(),
            PlayerOptions::default(),
        )?;
        let butler = Butler::new(
            player,
            ButlerConfig {
                frames_in_memory_multiplier: multiplier,
                ..ButlerConfig::default()
            },
        )?;
        butler.seek(DcpTime::from_seconds(from), true)?;

        let mut pulled = 0;
        while pulled < frames {
            let Some(video) = butler.get_video(Behaviour::Blocking)? else {
                break;
            };
            let mut peak = 0.0f32;
            while let Some(audio) = butler.get_audio(Behaviour::NonBlocking)? {
                for channel in 0..audio.buffers.channels() {
                    for sample in audio.buffers.channel(channel) {
                        peak = peak.max(sample.abs());
                    }
                }
            }
            let hash = video.source_hash();
            println!(
                "  {:>8.3}s  {:<5}  {}  peak {:.3}{}",
                video.time.seconds(),
                video.eyes.as_str(),
                &hash[..12],
                peak,
                if video.is_black_fill() { "  (black)" } else { "" },
            );
            pulled += 1;
        }
        println!("Pulled {pulled} picture(s); {} still queued", butler.video_queued());
        Ok(())
    })
    .await?
}
