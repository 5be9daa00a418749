//! Face recognition pipeline element.
//!
//! Kept frozen per device until the tracking element reports a person; then
//! it matches faces in the live frames against the device's known faces and
//! notifies once per newly-seen name. After enough attempts without any face
//! it freezes itself again, clears its per-stream dedup state and schedules a
//! cache refetch, handing control back to the tracker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tempfile::TempDir;
use url::Url;

use crate::api::{FaceRegistry, NotificationApi};
use crate::face::FaceEngine;
use crate::frame::Frame;
use crate::pipeline::{attach_frame, ElementDirective, FreezeState, PipelineElement};
use crate::{DeviceId, NotificationType};

pub const FACE_ELEMENT_NAME: &str = "face-recognition";

const UNKNOWN_PERSON: &str = "Unknown person";

/// Recognition cadence and matching thresholds.
#[derive(Clone, Debug)]
pub struct FaceSettings {
    /// Minimum time between recognition attempts per device.
    pub recognition_interval: Duration,
    /// Embedding distance below which a face matches a known name.
    pub match_tolerance: f32,
    /// Consecutive-attempt budget without a face before the element
    /// re-freezes itself for the device.
    pub no_faces_limit: u32,
    /// Frames are downscaled to this height before face location.
    pub recognition_height: u32,
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self {
            recognition_interval: Duration::from_millis(500),
            match_tolerance: 0.5,
            no_faces_limit: 15,
            recognition_height: 480,
        }
    }
}

/// Per-device face recognition state, created on stream start and destroyed
/// on stream end. The scratch directory holds downloaded reference photos
/// and is released with the cache.
pub struct DeviceFaceCache {
    names: Vec<String>,
    encodings: Vec<crate::face::FaceEmbedding>,
    last_attempt: Instant,
    no_faces_strikes: u32,
    /// Names already notified during this stream's lifetime.
    reported_faces: HashSet<String>,
    /// Known-face data must be (re)fetched before the next recognition.
    refetch: bool,
    scratch: TempDir,
}

impl DeviceFaceCache {
    fn new(device_id: DeviceId) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("doorwatch_faces_{}_", device_id))
            .tempdir()
            .context("create face scratch directory")?;
        Ok(Self {
            names: Vec::new(),
            encodings: Vec::new(),
            last_attempt: Instant::now(),
            no_faces_strikes: 0,
            reported_faces: HashSet::new(),
            refetch: true,
            scratch,
        })
    }
}

/// Pipeline element matching faces against per-device known-face caches.
pub struct FaceRecognitionElement {
    engine: Box<dyn FaceEngine>,
    registry: Box<dyn FaceRegistry>,
    api: Arc<dyn NotificationApi>,
    settings: FaceSettings,
    devices: HashMap<DeviceId, DeviceFaceCache>,
    frozen: FreezeState,
}

impl FaceRecognitionElement {
    pub fn new(
        engine: Box<dyn FaceEngine>,
        registry: Box<dyn FaceRegistry>,
        api: Arc<dyn NotificationApi>,
        settings: FaceSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            api,
            settings,
            devices: HashMap::new(),
            frozen: FreezeState::new(),
        }
    }
}

impl PipelineElement for FaceRecognitionElement {
    fn name(&self) -> &'static str {
        FACE_ELEMENT_NAME
    }

    fn freeze_state(&self) -> &FreezeState {
        &self.frozen
    }

    fn freeze_state_mut(&mut self) -> &mut FreezeState {
        &mut self.frozen
    }

    fn on_frame(&mut self, device_id: DeviceId, frame: &Frame) -> Result<Vec<ElementDirective>> {
        let Some(cache) = self.devices.get_mut(&device_id) else {
            return Ok(Vec::new());
        };

        if cache.refetch {
            refresh_known_faces(cache, &mut *self.engine, &*self.registry, device_id)?;
            cache.refetch = false;
        }

        if cache.last_attempt.elapsed() < self.settings.recognition_interval {
            return Ok(Vec::new());
        }
        cache.last_attempt = Instant::now();

        let resized = frame.resize_to_height(self.settings.recognition_height)?;
        let embeddings = self.engine.detect_faces(&resized)?;

        if embeddings.is_empty() {
            cache.no_faces_strikes += 1;
            if cache.no_faces_strikes >= self.settings.no_faces_limit {
                cache.no_faces_strikes = 0;
                cache.reported_faces.clear();
                cache.refetch = true;
                self.frozen.insert(device_id);
                log::info!(
                    "stream {}: no faces seen, recognition frozen until the tracker re-engages",
                    device_id
                );
            }
            return Ok(Vec::new());
        }

        for embedding in &embeddings {
            let best = cache
                .encodings
                .iter()
                .enumerate()
                .map(|(i, known)| (i, self.engine.distance(known, embedding)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let name = match best {
                Some((i, distance)) if distance < self.settings.match_tolerance => {
                    cache.names[i].clone()
                }
                _ => UNKNOWN_PERSON.to_string(),
            };

            if cache.reported_faces.contains(&name) {
                continue;
            }
            match self.api.send_notification(
                NotificationType::Visit,
                &format!("{} has arrived!", name),
                device_id,
            ) {
                Ok(notification_id) => {
                    cache.reported_faces.insert(name);
                    attach_frame(self.api.as_ref(), notification_id, frame);
                }
                Err(e) => {
                    log::warn!("stream {}: face notification dropped: {:#}", device_id, e)
                }
            }
        }
        Ok(Vec::new())
    }

    fn on_stream_start(&mut self, device_id: DeviceId) -> Result<()> {
        let cache = DeviceFaceCache::new(device_id)?;
        self.devices.insert(device_id, cache);
        // No recognition work until the tracker sees a person.
        self.frozen.insert(device_id);
        log::info!("stream {}: face recognition ready (frozen)", device_id);
        Ok(())
    }

    fn on_stream_end(&mut self, device_id: DeviceId) {
        // Dropping the cache releases the scratch directory.
        if self.devices.remove(&device_id).is_some() {
            log::info!("stream {}: face recognition ended", device_id);
        }
        self.frozen.remove(device_id);
    }
}

/// Replace the cache contents with freshly fetched reference faces.
///
/// Photos are downloaded into the device's scratch directory and embedded one
/// by one; a photo that fails to download, decode or embed is skipped.
fn refresh_known_faces(
    cache: &mut DeviceFaceCache,
    engine: &mut dyn FaceEngine,
    registry: &dyn FaceRegistry,
    device_id: DeviceId,
) -> Result<()> {
    let faces = registry.faces_for_device(device_id)?;
    cache.names.clear();
    cache.encodings.clear();

    for face in faces {
        let bytes = match registry.fetch_image(&face.image_url) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!(
                    "stream {}: face image download failed for {}: {:#}",
                    device_id,
                    face.name,
                    e
                );
                continue;
            }
        };
        let path = cache.scratch.path().join(scratch_file_name(&face.image_url));
        if let Err(e) = std::fs::write(&path, &bytes) {
            log::warn!(
                "stream {}: face image write failed for {}: {}",
                device_id,
                face.name,
                e
            );
            continue;
        }
        let image = match std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|data| Frame::from_jpeg(&data))
        {
            Ok(image) => image,
            Err(e) => {
                log::warn!(
                    "stream {}: face image unreadable for {}: {:#}",
                    device_id,
                    face.name,
                    e
                );
                continue;
            }
        };
        match engine.embed_image(&image) {
            Ok(Some(embedding)) => {
                cache.encodings.push(embedding);
                cache.names.push(face.name);
            }
            Ok(None) => log::warn!(
                "stream {}: no face found in reference photo for {}",
                device_id,
                face.name
            ),
            Err(e) => log::warn!(
                "stream {}: embedding failed for {}: {:#}",
                device_id,
                face.name,
                e
            ),
        }
    }
    log::info!(
        "stream {}: loaded {} known faces",
        device_id,
        cache.encodings.len()
    );
    Ok(())
}

fn scratch_file_name(image_url: &str) -> String {
    Url::parse(image_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "face.jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::KnownFace;
    use crate::face::{FaceEmbedding, StubFaceEngine};
    use std::sync::Mutex;

    struct RecordingApi {
        sent: Mutex<Vec<(NotificationType, String, DeviceId)>>,
    }

    impl RecordingApi {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl NotificationApi for RecordingApi {
        fn send_notification(
            &self,
            kind: NotificationType,
            message: &str,
            device_id: DeviceId,
        ) -> Result<i64> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((kind, message.to_string(), device_id));
            Ok(sent.len() as i64)
        }

        fn attach_image(&self, _notification_id: i64, _jpeg: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct StubRegistry {
        faces: Vec<KnownFace>,
        image: Vec<u8>,
    }

    impl FaceRegistry for StubRegistry {
        fn faces_for_device(&self, _device_id: DeviceId) -> Result<Vec<KnownFace>> {
            Ok(self.faces.clone())
        }

        fn fetch_image(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(self.image.clone())
        }
    }

    fn photo_jpeg() -> Vec<u8> {
        Frame::new(vec![100u8; 16 * 16 * 3], 16, 16)
            .unwrap()
            .encode_jpeg()
            .unwrap()
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 64 * 48 * 3], 64, 48).unwrap()
    }

    fn immediate_settings(no_faces_limit: u32) -> FaceSettings {
        FaceSettings {
            recognition_interval: Duration::ZERO,
            no_faces_limit,
            ..FaceSettings::default()
        }
    }

    fn registry_with_alice() -> StubRegistry {
        StubRegistry {
            faces: vec![KnownFace {
                name: "alice".to_string(),
                image_url: "http://backend/faces/alice.jpg".to_string(),
            }],
            image: photo_jpeg(),
        }
    }

    #[test]
    fn starts_frozen_per_device() {
        let mut element = FaceRecognitionElement::new(
            Box::new(StubFaceEngine::new()),
            Box::new(registry_with_alice()),
            Arc::new(RecordingApi::new()),
            immediate_settings(15),
        );
        element.on_stream_start(3).unwrap();
        assert!(element.is_frozen(3));
        assert!(!element.is_frozen(4));
    }

    #[test]
    fn known_face_notifies_once_per_stream() {
        let api = Arc::new(RecordingApi::new());
        let mut engine = StubFaceEngine::new();
        // Reference photo embeds to the origin; both frames show a face right
        // next to it.
        engine.push_image_face(Some(FaceEmbedding(vec![0.0, 0.0])));
        engine.push_frame_faces(vec![FaceEmbedding(vec![0.1, 0.0])]);
        engine.push_frame_faces(vec![FaceEmbedding(vec![0.1, 0.0])]);

        let mut element = FaceRecognitionElement::new(
            Box::new(engine),
            Box::new(registry_with_alice()),
            api.clone(),
            immediate_settings(15),
        );
        element.on_stream_start(3).unwrap();
        element.unfreeze(3);

        element.on_frame(3, &frame()).unwrap();
        element.on_frame(3, &frame()).unwrap();

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            (NotificationType::Visit, "alice has arrived!".to_string(), 3)
        );
    }

    #[test]
    fn unmatched_face_reports_unknown_person() {
        let api = Arc::new(RecordingApi::new());
        let mut engine = StubFaceEngine::new();
        engine.push_image_face(Some(FaceEmbedding(vec![0.0, 0.0])));
        engine.push_frame_faces(vec![FaceEmbedding(vec![5.0, 5.0])]);

        let mut element = FaceRecognitionElement::new(
            Box::new(engine),
            Box::new(registry_with_alice()),
            api.clone(),
            immediate_settings(15),
        );
        element.on_stream_start(3).unwrap();
        element.unfreeze(3);
        element.on_frame(3, &frame()).unwrap();

        let sent = api.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            (
                NotificationType::Visit,
                "Unknown person has arrived!".to_string(),
                3
            )
        );
    }

    #[test]
    fn refreezes_after_no_face_strikes_and_schedules_refetch() {
        let api = Arc::new(RecordingApi::new());
        let engine = StubFaceEngine::new(); // never sees a face
        let mut element = FaceRecognitionElement::new(
            Box::new(engine),
            Box::new(registry_with_alice()),
            api.clone(),
            immediate_settings(2),
        );
        element.on_stream_start(3).unwrap();
        element.unfreeze(3);

        element.on_frame(3, &frame()).unwrap();
        assert!(!element.is_frozen(3));
        element.on_frame(3, &frame()).unwrap();
        assert!(element.is_frozen(3));

        let cache = element.devices.get(&3).unwrap();
        assert!(cache.refetch);
        assert!(cache.reported_faces.is_empty());
        assert_eq!(cache.no_faces_strikes, 0);
    }

    #[test]
    fn stream_end_drops_cache_and_is_idempotent() {
        let mut element = FaceRecognitionElement::new(
            Box::new(StubFaceEngine::new()),
            Box::new(registry_with_alice()),
            Arc::new(RecordingApi::new()),
            immediate_settings(15),
        );
        element.on_stream_start(3).unwrap();
        let scratch_path = element.devices.get(&3).unwrap().scratch.path().to_path_buf();
        assert!(scratch_path.exists());

        element.on_stream_end(3);
        assert!(!scratch_path.exists());
        assert!(!element.is_frozen(3));
        element.on_stream_end(3);
    }

    #[test]
    fn corrupt_reference_photo_is_skipped() {
        let api = Arc::new(RecordingApi::new());
        let mut engine = StubFaceEngine::new();
        engine.push_frame_faces(vec![FaceEmbedding(vec![0.0])]);
        let registry = StubRegistry {
            faces: vec![KnownFace {
                name: "bob".to_string(),
                image_url: "http://backend/faces/bob.jpg".to_string(),
            }],
            image: b"not a jpeg".to_vec(),
        };

        let mut element = FaceRecognitionElement::new(
            Box::new(engine),
            Box::new(registry),
            api.clone(),
            immediate_settings(15),
        );
        element.on_stream_start(3).unwrap();
        element.unfreeze(3);
        element.on_frame(3, &frame()).unwrap();

        // Cache ended up empty, so the face reports as unknown.
        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Unknown person"));
    }

    #[test]
    fn scratch_file_name_falls_back() {
        assert_eq!(
            scratch_file_name("http://backend/faces/alice.jpg?token=1"),
            "alice.jpg"
        );
        assert_eq!(scratch_file_name("not a url"), "face.jpg");
    }
}
