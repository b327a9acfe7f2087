//! Query a running master's job status.

use reelkit_common::config::AppConfig;
use reelkit_mastering::status::fetch_status;

pub async fn run(config: &AppConfig, addr: Option<String>) -> anyhow::Result<()> {
    let addr = addr.unwrap_or_else(|| format!("127.0.0.1:{}", config.encoding.ports().status));
    let jobs = fetch_status(&addr).await?;

    if jobs.is_empty() {
        println!("No jobs");
    }
    for job in &jobs {
        let progress = job
            .progress
            .map(|p| format!("{:.1}%", p * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}: {} {}",
            job.name,
            serde_json::to_value(job.status)?.as_str().unwrap_or_default(),
            progress
        );
        if let Some(started) = job.started_at {
            println!("  started {}", started.to_rfc3339());
        }
        if let Some(error) = &job.error {
            println!("  error: {error}");
        }
    }
    Ok(())
}
