mod assets;
mod camera;
mod filter;
mod locator;
mod processor;
mod session;
mod sink;
mod slot;
mod transport;

use facecall_common::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use assets::OverlayAssetStore;
use filter::{FilterKind, FilterSelection};
use processor::VideoProcessor;
use session::{Session, SessionSettings};
use sink::HeadlessSink;
use transport::UdpTransport;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Capture(#[from] camera::CaptureError),
    #[error(transparent)]
    Locator(#[from] locator::LocatorError),
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        peer = %config.peer.peer_addr(),
        inbound = %config.peer.inbound_addr(),
        camera = %config.camera.backend,
        quality = config.codec.quality,
        "starting facecall"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "facecall failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), ClientError> {
    let assets = Arc::new(OverlayAssetStore::load(&config.assets.dir));
    let available = assets.available();
    if available.is_empty() {
        warn!(dir = %config.assets.dir.display(), "no overlays loaded, filters will pass frames through");
    } else {
        info!(overlays = ?available, "overlays ready");
    }

    let initial = config
        .session
        .initial_filter
        .parse::<FilterKind>()
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to no filter");
            FilterKind::None
        });

    let source = camera::open_source(&config.camera)?;
    let processor = VideoProcessor::new(
        source,
        locator::open_locator(&config.detector)?,
        Arc::clone(&assets),
        FilterSelection::new(initial),
    );

    let transport = UdpTransport::bind(
        config.peer.inbound_addr(),
        config.peer.peer_addr(),
        config.peer.socket_buffer_bytes,
    )?;

    let mut session = Session::start(
        processor,
        transport,
        SessionSettings {
            quality: config.codec.quality,
            shutdown_timeout: config.session.shutdown_timeout(),
        },
    );
    info!(filters = ?session.filter_names(), "type a filter name to select it, `quit` to leave");

    let mut sink = HeadlessSink::new(
        config.session.snapshot_dir().map(PathBuf::from),
        config.session.snapshot_every,
    );

    tokio::select! {
        _ = session::run_render_loop(&session, &mut sink, config.session.render_interval()) => {}
        _ = read_commands(&session) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    session.stop().await;
    Ok(())
}

/// Line-oriented control: a filter name selects it, `list` shows the names,
/// `quit` leaves. Once stdin closes or fails, commands stop and the call runs
/// until interrupted.
async fn read_commands(session: &Session) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, use ctrl-c to leave");
                std::future::pending::<()>().await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read command");
                std::future::pending::<()>().await;
                return;
            }
        };
        match line.trim() {
            "" => {}
            "quit" | "exit" => return,
            "list" => info!(
                filters = ?session.filter_names(),
                current = %session.filter(),
                "available filters"
            ),
            name => {
                if !session.set_filter_by_name(name) {
                    warn!(input = name, "unknown filter");
                }
            }
        }
    }
}
