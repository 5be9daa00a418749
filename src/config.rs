use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::{FaceSettings, TrackerSettings};

const DEFAULT_STREAMING_SERVER_URL: &str = "http://127.0.0.1:9002";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;
const DEFAULT_OPEN_TIMEOUT_MS: u64 = 1000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    streaming_server_url: Option<String>,
    backend_url: Option<String>,
    bind_host: Option<String>,
    sync_interval_secs: Option<u64>,
    source: Option<SourceConfigFile>,
    tracker: Option<TrackerConfigFile>,
    face: Option<FaceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    open_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    detection_interval_ms: Option<u64>,
    static_min_lifetime: Option<u32>,
    static_box_px_variation: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FaceConfigFile {
    recognition_interval_ms: Option<u64>,
    match_tolerance: Option<f32>,
    no_faces_limit: Option<u32>,
    recognition_height: Option<u32>,
}

/// Frame source timeouts.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub open_timeout: Duration,
    pub read_timeout: Duration,
}

/// Daemon configuration: JSON file named by `DOORWATCH_CONFIG`, then
/// `DOORWATCH_*` environment overrides, then validation.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub streaming_server_url: String,
    pub backend_url: String,
    /// Relay target host, as reachable from the streaming server.
    pub bind_host: String,
    pub sync_interval: Duration,
    pub source: SourceSettings,
    pub tracker: TrackerSettings,
    pub face: FaceSettings,
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DOORWATCH_CONFIG").ok();
        Self::load_with_path(config_path.as_deref().map(Path::new))
    }

    /// Load with an explicit config file (CLI `--config`), falling back to
    /// defaults when none is given.
    pub fn load_with_path(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let streaming_server_url = file
            .streaming_server_url
            .unwrap_or_else(|| DEFAULT_STREAMING_SERVER_URL.to_string());
        let backend_url = file
            .backend_url
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let bind_host = file
            .bind_host
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
        let sync_interval = Duration::from_secs(
            file.sync_interval_secs
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        );
        let source = SourceSettings {
            open_timeout: Duration::from_millis(
                file.source
                    .as_ref()
                    .and_then(|source| source.open_timeout_ms)
                    .unwrap_or(DEFAULT_OPEN_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(
                file.source
                    .as_ref()
                    .and_then(|source| source.read_timeout_ms)
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
        };

        let tracker_defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            detection_interval: file
                .tracker
                .as_ref()
                .and_then(|tracker| tracker.detection_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(tracker_defaults.detection_interval),
            static_min_lifetime: file
                .tracker
                .as_ref()
                .and_then(|tracker| tracker.static_min_lifetime)
                .unwrap_or(tracker_defaults.static_min_lifetime),
            static_box_px_variation: file
                .tracker
                .as_ref()
                .and_then(|tracker| tracker.static_box_px_variation)
                .unwrap_or(tracker_defaults.static_box_px_variation),
        };

        let face_defaults = FaceSettings::default();
        let face = FaceSettings {
            recognition_interval: file
                .face
                .as_ref()
                .and_then(|face| face.recognition_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(face_defaults.recognition_interval),
            match_tolerance: file
                .face
                .as_ref()
                .and_then(|face| face.match_tolerance)
                .unwrap_or(face_defaults.match_tolerance),
            no_faces_limit: file
                .face
                .as_ref()
                .and_then(|face| face.no_faces_limit)
                .unwrap_or(face_defaults.no_faces_limit),
            recognition_height: file
                .face
                .and_then(|face| face.recognition_height)
                .unwrap_or(face_defaults.recognition_height),
        };

        Self {
            streaming_server_url,
            backend_url,
            bind_host,
            sync_interval,
            source,
            tracker,
            face,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DOORWATCH_STREAMING_SERVER_URL") {
            if !url.trim().is_empty() {
                self.streaming_server_url = url;
            }
        }
        if let Ok(url) = std::env::var("DOORWATCH_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url;
            }
        }
        if let Ok(host) = std::env::var("DOORWATCH_BIND_HOST") {
            if !host.trim().is_empty() {
                self.bind_host = host;
            }
        }
        if let Ok(interval) = std::env::var("DOORWATCH_SYNC_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("DOORWATCH_SYNC_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.sync_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.streaming_server_url.trim().is_empty() {
            return Err(anyhow!("streaming server url must not be empty"));
        }
        if self.backend_url.trim().is_empty() {
            return Err(anyhow!("backend url must not be empty"));
        }
        if self.bind_host.trim().is_empty() {
            return Err(anyhow!("bind host must not be empty"));
        }
        if self.sync_interval.is_zero() {
            return Err(anyhow!("sync interval must be greater than zero"));
        }
        if self.source.open_timeout.is_zero() || self.source.read_timeout.is_zero() {
            return Err(anyhow!("source timeouts must be greater than zero"));
        }
        if self.tracker.static_min_lifetime == 0 {
            return Err(anyhow!("static minimum lifetime must be at least 1"));
        }
        if self.tracker.static_box_px_variation <= 0.0 {
            return Err(anyhow!("static box variation must be positive"));
        }
        if !(0.0..=1.0).contains(&self.face.match_tolerance) || self.face.match_tolerance == 0.0 {
            return Err(anyhow!("face match tolerance must be in (0, 1]"));
        }
        if self.face.no_faces_limit == 0 {
            return Err(anyhow!("no-faces limit must be at least 1"));
        }
        if self.face.recognition_height == 0 {
            return Err(anyhow!("recognition height must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
