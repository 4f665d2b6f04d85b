//! VTS daemon launcher.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::sync::watch;

use vtsource::formats::{ColorSpace, OutputFormat, VideoStandard};
use vtsource::protocol::DEFAULT_PORT;
use vtsource::server::{Server, ServerConfig};
use vtsource::source::VideoSource;
use vtsource::Discovery;

#[derive(Parser)]
#[command(name = "vtsd", version, about = "VTS video source daemon")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Default video standard (ntsc or pal)
    #[arg(long, default_value = "ntsc")]
    format: String,

    /// Default colorspace (rgb24, yuv422, yuv420p)
    #[arg(long, default_value = "rgb24")]
    colorspace: String,

    /// Media root directory for relative paths
    #[arg(long)]
    media: Option<PathBuf>,

    /// Announce the daemon over mDNS
    #[arg(long)]
    announce: bool,

    /// Drop connections idle for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let standard: VideoStandard = args.format.parse()?;
    let colorspace: ColorSpace = args.colorspace.parse()?;
    let output_format = OutputFormat::new(standard, colorspace);
    info!("Default format: {}", output_format);

    // Fetch an ffmpeg binary if none is on the PATH yet.
    if let Err(e) = ffmpeg_sidecar::download::auto_download() {
        warn!("ffmpeg unavailable ({}); LOAD will fail until it is installed", e);
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        media_root: args.media,
        idle_timeout: args.idle_timeout.map(Duration::from_secs),
        ..ServerConfig::default()
    };

    let source = VideoSource::new(output_format);
    let server = Server::bind(config, source).await?;

    let _discovery = if args.announce {
        let discovery = Discovery::new()?;
        discovery.register_daemon("vtsd", args.port, output_format)?;
        Some(discovery)
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    Ok(())
}
