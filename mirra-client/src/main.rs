//! Mirra viewer: entry point.
//!
//! ```text
//! mirra-client                    Connect with defaults
//! mirra-client --config <path>    Use custom config TOML
//! mirra-client --server <addr>    Override the server address
//! mirra-client --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mirra_core::ConsumerSession;

use mirra_client::config::ClientConfig;
use mirra_client::decode::JpegFrameDecoder;
use mirra_client::display::{HeadlessDisplay, render_loop};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mirra-client", about = "Mirra frame streaming viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mirra-client.toml")]
    config: PathBuf,

    /// Server address (overrides config). Example: 192.168.1.100:33060
    #[arg(short, long)]
    server: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(addr) = cli.server {
        config.network.server_address = addr;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mirra-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Start the consumer session ───────────────────────────

    let consumer_config = config.to_consumer_config()?;
    info!("connecting to {}", consumer_config.server);
    let consumer = ConsumerSession::bind(consumer_config, JpegFrameDecoder).await?;
    let reader = consumer.reader();
    let stats = consumer.stats();
    let session = consumer.start();
    let cancel = session.cancel_token();

    // Ctrl-C handler.
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    // ── 2. Render loop ──────────────────────────────────────────

    let render = tokio::spawn(render_loop(
        reader,
        stats.clone(),
        HeadlessDisplay::new(config.snapshot_path()),
        config.tick(),
        config.stats_interval(),
        cancel.clone(),
    ));

    // ── 3. Shutdown ─────────────────────────────────────────────

    // The session ends on Ctrl-C or when the server cannot be reached.
    let result = session.wait().await;
    cancel.cancel();
    let display = render.await?;

    let s = stats.snapshot();
    let rendered = display.rendered();
    info!(
        "rendered {} of {} received frames, {} dropped",
        rendered,
        s.received,
        s.dropped
    );

    if let Err(e) = result {
        error!("viewer stopped: {e}");
        return Err(e.into());
    }
    Ok(())
}
