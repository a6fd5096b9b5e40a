//! Daemon entry point: boots the system against a fixed local output
//! directory and serves the control channel until a transport feeds it
//! requests or the process receives a termination signal.
//!
//! No CLI argument parsing (out of scope, per spec.md §1) — the output
//! directory and everything else come from the bootstrap defaults and the
//! parameter store's own persistence path.

use isi_macroscope::lifecycle::System;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let output_dir = std::env::var("ISI_OUTPUT_DIR").unwrap_or_else(|_| "./isi-sessions".to_string());
    let system = System::start(&output_dir).await?;

    let (_tx, rx) = mpsc::channel(32);
    tracing::info!("isi-daemon ready, output directory {output_dir}");

    tokio::select! {
        _ = system.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    system.shutdown().await;
    Ok(())
}
