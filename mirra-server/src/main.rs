//! Mirra streaming server: entry point.
//!
//! ```text
//! mirra-server                   Serve with defaults
//! mirra-server --config <path>   Load a custom config TOML
//! mirra-server --port <port>     Override the listen port
//! mirra-server --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mirra_server::config::ServerConfig;
use mirra_server::service::StreamService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mirra-server", about = "Mirra frame streaming server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mirra-server.toml")]
    config: PathBuf,

    /// UDP port to listen on (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.listen_port = port;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mirra-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "listening on {}:{}",
        config.network.bind_address, config.network.listen_port
    );
    info!(
        "stream: {}x{} @ {} fps, quality {}",
        config.stream.width, config.stream.height, config.stream.fps, config.stream.quality
    );

    let mut service = StreamService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    if let Err(e) = service.run().await {
        error!("server failed: {e}");
        return Err(e.into());
    }

    Ok(())
}
