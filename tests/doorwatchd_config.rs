use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use doorwatch::config::ServiceConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DOORWATCH_CONFIG",
        "DOORWATCH_STREAMING_SERVER_URL",
        "DOORWATCH_BACKEND_URL",
        "DOORWATCH_BIND_HOST",
        "DOORWATCH_SYNC_INTERVAL_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.streaming_server_url, "http://127.0.0.1:9002");
    assert_eq!(cfg.backend_url, "http://127.0.0.1:8080/");
    assert_eq!(cfg.sync_interval, Duration::from_secs(5));
    assert_eq!(cfg.source.read_timeout, Duration::from_millis(200));
    assert_eq!(cfg.tracker.detection_interval, Duration::from_secs(1));
    assert_eq!(cfg.tracker.static_min_lifetime, 10);
    assert_eq!(cfg.face.no_faces_limit, 15);
    assert_eq!(cfg.face.recognition_height, 480);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "streaming_server_url": "http://streams:9002",
        "backend_url": "http://backend:8080/",
        "bind_host": "10.0.0.5",
        "sync_interval_secs": 3,
        "source": {
            "open_timeout_ms": 500,
            "read_timeout_ms": 100
        },
        "tracker": {
            "detection_interval_ms": 250,
            "static_min_lifetime": 12,
            "static_box_px_variation": 15.0
        },
        "face": {
            "recognition_interval_ms": 200,
            "match_tolerance": 0.4,
            "no_faces_limit": 10,
            "recognition_height": 360
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DOORWATCH_CONFIG", file.path());
    std::env::set_var("DOORWATCH_BIND_HOST", "192.168.1.20");
    std::env::set_var("DOORWATCH_SYNC_INTERVAL_SECS", "9");

    let cfg = ServiceConfig::load().expect("load config");

    assert_eq!(cfg.streaming_server_url, "http://streams:9002");
    assert_eq!(cfg.backend_url, "http://backend:8080/");
    // Environment wins over the file.
    assert_eq!(cfg.bind_host, "192.168.1.20");
    assert_eq!(cfg.sync_interval, Duration::from_secs(9));
    assert_eq!(cfg.source.open_timeout, Duration::from_millis(500));
    assert_eq!(cfg.source.read_timeout, Duration::from_millis(100));
    assert_eq!(cfg.tracker.detection_interval, Duration::from_millis(250));
    assert_eq!(cfg.tracker.static_min_lifetime, 12);
    assert!((cfg.tracker.static_box_px_variation - 15.0).abs() < f64::EPSILON);
    assert_eq!(cfg.face.recognition_interval, Duration::from_millis(200));
    assert!((cfg.face.match_tolerance - 0.4).abs() < f32::EPSILON);
    assert_eq!(cfg.face.no_faces_limit, 10);
    assert_eq!(cfg.face.recognition_height, 360);

    clear_env();
}

#[test]
fn rejects_zero_sync_interval() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"sync_interval_secs": 0}"#).expect("write config");
    std::env::set_var("DOORWATCH_CONFIG", file.path());

    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("sync interval"));

    clear_env();
}

#[test]
fn rejects_out_of_range_tolerance() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"face": {"match_tolerance": 1.5}}"#)
        .expect("write config");
    std::env::set_var("DOORWATCH_CONFIG", file.path());

    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("tolerance"));

    clear_env();
}

#[test]
fn invalid_sync_interval_env_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DOORWATCH_SYNC_INTERVAL_SECS", "soon");
    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("DOORWATCH_SYNC_INTERVAL_SECS"));

    clear_env();
}
