//! Master a project into a package of reels.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use reelkit_common::config::AppConfig;
use reelkit_common::error::ReelkitError;
use reelkit_mastering::status::STATUS_PATH;
use reelkit_mastering::{MasteringConfig, RleEncoder, StatusBoard, StatusServer, Transcoder};
use reelkit_player::SyntheticDecoderFactory;
use reelkit_timeline_model::LoadedProject;

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    output: Option<PathBuf>,
    threads: Option<usize>,
    servers: Vec<String>,
    status: bool,
) -> anyhow::Result<()> {
    println!("Mastering project at: {}", path.display());

    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let missing = project.project.playlist.preflight();
    if !missing.is_empty() {
        println!("  Warning: {} content source(s) missing and left out", missing.len());
    }

    let mut encoding = config.encoding.clone();
    if let Some(threads) = threads {
        encoding.threads = threads;
    }
    encoding.servers.extend(servers);
    let output_dir = output.unwrap_or_else(|| project.output_dir());

    println!("  Output: {}", output_dir.display());
    println!("  Threads: {}", encoding.threads);
    if !encoding.servers.is_empty() {
        println!("  Servers: {}", encoding.servers.join(", "));
    }

    let board = StatusBoard::new();
    let job = board.add(format!("master {}", project.project.name));
    if status {
        let server = StatusServer::bind(("0.0.0.0", encoding.ports().status), board.clone()).await?;
        println!("  Status: http://{}{STATUS_PATH}", server.local_addr()?);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::warn!(error = %e, "Status server stopped");
            }
        });
    }

    let transcoder = Transcoder::new(
        project.project.playlist.snapshot(),
        project.project.settings.clone(),
        MasteringConfig {
            encoding,
            output: output_dir.clone(),
        },
        Arc::new(SyntheticDecoderFactory),
        Arc::new(RleEncoder),
    )
    .with_job(job.clone());

    let cancel = transcoder.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancelling...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let progress_job = job.clone();
    let progress = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            let report = progress_job.report();
            if let Some(fraction) = report.progress {
                print!("\r  Progress: {:.1}%  ", fraction * 100.0);
            }
        }
    });

    let result = tokio::task::spawn_blocking(move || transcoder.run()).await?;
    progress.abort();

    match result {
        Ok(summary) => {
            println!("\nMastering complete: {}", summary.output.display());
            println!(
                "  Frames: {} encoded, {} reused",
                summary.frames_encoded, summary.frames_reused
            );
            if summary.referenced > 0 {
                println!("  Referenced: {}", summary.referenced);
            }
            for reel in &summary.reels {
                println!(
                    "  {}: {} frames, {} picture bytes, {} samples, {} caption(s), {} reference(s)",
                    reel.directory,
                    reel.frames,
                    reel.picture_bytes,
                    reel.sound_samples,
                    reel.text_entries,
                    reel.referenced.len()
                );
            }
            Ok(())
        }
        Err(ReelkitError::Cancelled) => {
            println!("\nMastering cancelled");
            Ok(())
        }
        Err(e) => {
            println!("\nMastering failed ({} stage): {e}", e.stage().as_str());
            Err(e.into())
        }
    }
}
