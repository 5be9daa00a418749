//! doorwatchd - per-device video stream daemon
//!
//! This daemon:
//! 1. Polls the streaming server for live devices on a fixed cadence
//! 2. Opens one relay-fed frame source per device, closes gone ones
//! 3. Reads one frame per stream per iteration and fans it out to the
//!    pipeline (object tracking, face recognition)
//! 4. Ships deduplicated notifications with JPEG evidence to the backend
//!
//! The whole daemon is one cooperative loop: a slow element on one stream
//! delays the others, which is the accepted trade-off for keeping every
//! per-device map single-threaded.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use doorwatch::config::ServiceConfig;
use doorwatch::{
    DeviceId, FaceRecognitionElement, HttpBackendApi, HttpStreamRegistry,
    ScriptedDetectionEngine, SourceFactory, StreamManager, StreamRegistry, StubFaceEngine,
    SyntheticSourceFactory, TrackingElement, UdpSourceFactory,
};

const FRAME_SLEEP: Duration = Duration::from_millis(1);
const DEBUG_DEVICE_ID: DeviceId = 0;

#[derive(Parser, Debug)]
#[command(
    name = "doorwatchd",
    about = "Video stream tracking and notification service"
)]
struct Args {
    /// Config file (JSON). Defaults to the DOORWATCH_CONFIG environment
    /// variable when not given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Streaming server URL override.
    #[arg(long = "strsrv-url")]
    strsrv_url: Option<String>,

    /// Backend API URL override.
    #[arg(long)]
    backend_url: Option<String>,

    /// Run against a single synthetic local stream instead of the streaming
    /// server.
    #[arg(long)]
    debug: bool,
}

/// Registry substitute for debug mode: one fixed synthetic device, no relay.
struct DebugRegistry;

impl StreamRegistry for DebugRegistry {
    fn fetch_devices(&self) -> Result<Vec<DeviceId>> {
        Ok(vec![DEBUG_DEVICE_ID])
    }

    fn bind_stream(&self, _device_id: DeviceId, _local_addr: &str) -> Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => ServiceConfig::load_with_path(Some(path.as_path())),
        None => ServiceConfig::load(),
    }?;
    if let Some(url) = args.strsrv_url {
        cfg.streaming_server_url = url;
    }
    if let Some(url) = args.backend_url {
        cfg.backend_url = url;
    }

    let api = Arc::new(HttpBackendApi::new(cfg.backend_url.clone()));

    // The real detection/face models are external integrations; without them
    // the daemon runs the full stream lifecycle with inert engines.
    log::warn!("no detection engine configured; running with inert stub engines");
    let detection = Box::new(ScriptedDetectionEngine::new());
    let face_engine = Box::new(StubFaceEngine::new());
    let face_registry = Box::new(HttpBackendApi::new(cfg.backend_url.clone()));

    let (registry, sources): (Box<dyn StreamRegistry>, Box<dyn SourceFactory>) = if args.debug {
        log::info!("debug mode: synthetic stream for device {}", DEBUG_DEVICE_ID);
        (
            Box::new(DebugRegistry),
            Box::new(SyntheticSourceFactory::default()),
        )
    } else {
        (
            Box::new(HttpStreamRegistry::new(cfg.streaming_server_url.clone())),
            Box::new(UdpSourceFactory {
                read_timeout: cfg.source.read_timeout,
                open_timeout: cfg.source.open_timeout,
            }),
        )
    };

    let mut manager = StreamManager::new(registry, sources, cfg.bind_host.clone());
    manager.push_element(Box::new(TrackingElement::new(
        detection,
        api.clone(),
        cfg.tracker.clone(),
    )));
    manager.push_element(Box::new(FaceRecognitionElement::new(
        face_engine,
        face_registry,
        api.clone(),
        cfg.face.clone(),
    )));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    log::info!(
        "doorwatchd running (streaming server {}, backend {})",
        cfg.streaming_server_url,
        cfg.backend_url
    );

    let mut last_sync: Option<Instant> = None;
    while running.load(Ordering::SeqCst) {
        let sync_due = last_sync.map_or(true, |at| at.elapsed() >= cfg.sync_interval);
        if sync_due {
            // Only port exhaustion propagates; it means the host is out of
            // ephemeral ports and the process must die loudly.
            manager.sync_streams()?;
            last_sync = Some(Instant::now());
        }

        for device_id in manager.device_ids() {
            manager.pipe_stream(device_id);
        }
        std::thread::sleep(FRAME_SLEEP);
    }

    log::info!("shutting down");
    for device_id in manager.device_ids() {
        manager.delete_stream(device_id);
    }
    Ok(())
}
