//! parley daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parley::audio::AudioCapture;
use parley::audio::list_input_devices;
use parley::config::Config;
use parley::pipeline::supervisor::PipelineSupervisor;
use parley::recognition::transport::WsTransport;
use parley::server::PushServer;
use parley::services::suggestion::HttpSuggestionClient;
use parley::services::translation::HttpTranslator;

#[derive(Parser, Debug)]
#[command(name = "parley", version = parley::version_string(), about = "Real-time conversation assist daemon")]
struct Cli {
    /// Path to the configuration file (defaults to the XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Push channel bind host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Push channel port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Loopback device name substring (overrides config)
    #[arg(long)]
    device: Option<String>,

    /// Microphone device name substring (overrides config)
    #[arg(long)]
    mic_device: Option<String>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={default_level},info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    }
    .with_env_overrides();

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(device) = cli.device {
        config.audio.loopback_device = Some(device);
    }
    if let Some(device) = cli.mic_device {
        config.audio.mic_device = Some(device);
    }

    if cli.list_devices {
        for name in list_input_devices(config.audio.host_api.as_deref())? {
            println!("{name}");
        }
        return Ok(());
    }

    info!("parley {} starting", parley::version_string());

    let supervisor = PipelineSupervisor::new(
        &config,
        Arc::new(WsTransport),
        Arc::new(HttpTranslator::new(&config.translation)),
        Arc::new(HttpSuggestionClient::new(&config.suggestion)),
    );

    // Capture runs for the whole process lifetime; the control plane only
    // gates what the pipeline does with the frames.
    let capture = AudioCapture::new(config.audio.clone(), supervisor.frame_sender());
    capture.start()?;

    supervisor.start().await;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let server = Arc::new(
        PushServer::bind(
            &addr,
            supervisor.broadcaster(),
            config.server.allowed_origins.clone(),
        )
        .await?,
    );

    let server_task = {
        let server = Arc::clone(&server);
        let handler = Arc::clone(&supervisor);
        tokio::spawn(async move { server.serve(handler).await })
    };

    // Wait for SIGTERM or SIGINT
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                error!("failed to install SIGTERM handler: {e}");
            }
            info!("received SIGTERM, shutting down");
        }
    }

    // Stop accepting clients first, then tear the pipeline down.
    server.stop();
    match server_task.await {
        Ok(Err(e)) => error!("push channel server error: {e}"),
        Err(e) => error!("push channel server task failed: {e}"),
        Ok(Ok(())) => {}
    }

    supervisor.shutdown().await;
    capture.stop();

    info!("parley stopped");
    Ok(())
}

/// Wait for SIGTERM (used by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> std::io::Result<()> {
    // On non-Unix, just wait forever (Ctrl+C still works).
    std::future::pending::<()>().await
}
