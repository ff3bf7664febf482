use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::Context;
use bittorrent::{ClientConfig, CommandToTorrent, EngineConfig, MetaInfo, Torrent};
use clap::Parser;

#[derive(Parser)]
#[command(name = "bittorrent", about = "A BitTorrent v1 client")]
struct Args {
    /// Path to the .torrent file to download or seed
    torrent_path: PathBuf,

    /// Output directory
    #[arg(long, default_value = "downloads")]
    download_dir: PathBuf,

    /// TCP port for incoming peers and tracker announces
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Session cap
    #[arg(long, default_value_t = 50)]
    max_peers: u32,

    /// Start in seeding mode: verify all pieces at init, never request blocks
    #[arg(long)]
    seed: bool,

    /// Raise log verbosity (repeatable: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(args))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("bittorrent={level},cli={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> ExitCode {
    // Input errors (bad torrent file, unreadable path) are the user's fault:
    // exit 1. Everything past that point (tracker/peer/disk trouble surfacing
    // out of the run loop) is exit 2, per the CLI's error taxonomy.
    let metainfo = match MetaInfo::new(&args.torrent_path)
        .with_context(|| format!("failed to read torrent file {}", args.torrent_path.display()))
    {
        Ok(metainfo) => metainfo,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let listen_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let mut engine_config = EngineConfig::new(args.download_dir, listen_address, args.max_peers);
    engine_config.seed_mode = args.seed;
    let client_config = ClientConfig::generate();

    let mut torrent = match Torrent::new(metainfo, engine_config, client_config)
        .await
        .context("failed to initialize torrent")
    {
        Ok(torrent) => torrent,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let shutdown = torrent.handle();
    let mut run_task = tokio::spawn(async move { torrent.start().await });

    tokio::select! {
        result = &mut run_task => {
            match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    eprintln!("error: {}", e);
                    ExitCode::from(2)
                }
                Err(e) => {
                    eprintln!("error: torrent task panicked: {}", e);
                    ExitCode::from(2)
                }
            }
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down gracefully");
            shutdown.send(CommandToTorrent::Shutdown).ok();
            match run_task.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => eprintln!("error during shutdown: {}", e),
                Err(e) => eprintln!("error: torrent task panicked: {}", e),
            }
            ExitCode::from(130)
        }
    }
}
