//! Run a remote encode server.

use std::sync::Arc;

use reelkit_common::config::AppConfig;
use reelkit_mastering::{EncodeServer, RleEncoder};

pub async fn run(config: &AppConfig, bind: String, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.encoding.ports().encode);
    let server = EncodeServer::bind((bind.as_str(), port), Arc::new(RleEncoder)).await?;
    println!("Encode server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => println!("Shutting down"),
    }
    Ok(())
}
