//! Voice Desk Server
//!
//! Runs the voice call queue and lifecycle coordinator behind its HTTP and
//! WebSocket API until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use voicedesk_call_engine::logging::{setup_logging, LogFormat, LoggingConfig};
use voicedesk_call_engine::{VoiceDeskConfig, VoiceDeskServerBuilder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Voice call queue and session lifecycle server", long_about = None)]
struct Args {
    /// TOML configuration file; `VOICEDESK_*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.bind_addr`
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    log_source: bool,

    /// Log span entry and exit
    #[arg(long)]
    log_spans: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = if args.json_logs { LogFormat::Json } else { LogFormat::Text };
    let logging = LoggingConfig::from_level_name(&args.log_level)?
        .format(format)
        .source_location(args.log_source)
        .span_events(args.log_spans);
    setup_logging(&logging)?;

    let config = VoiceDeskConfig::load(args.config.as_deref()).context("loading configuration")?;

    let mut builder = VoiceDeskServerBuilder::new().with_config(config);
    if let Some(addr) = args.bind {
        builder = builder.with_bind_addr(addr);
    }
    let mut server = builder.build().context("building server")?;

    server.start().await?;
    server
        .serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Ctrl-C received, shutting down");
            }
        })
        .await?;
    server.stop().await?;

    Ok(())
}
