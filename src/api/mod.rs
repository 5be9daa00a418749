//! Backend API clients.
//!
//! Two ports live here: `NotificationApi` (submit a notification, attach a
//! JPEG evidence frame) and `FaceRegistry` (known faces per device, reference
//! photo download). `HttpBackendApi` implements both against the backend
//! service; tests substitute recording/stub implementations.
//!
//! Calls are synchronous and never retried: a failed call is logged by the
//! caller and the notification for that cycle is dropped.

use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{DeviceId, NotificationType};

const NOTIFICATION_ENDPOINT: &str = "api/v1/notification/ai-service";
const UPLOAD_ENDPOINT: &str = "api/v1/minio/upload";
const FACES_ENDPOINT: &str = "api/v1/faces/ai-service";

/// Cap on a downloaded reference photo.
const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Outbound notification port.
pub trait NotificationApi {
    /// Submit a notification; returns the backend-assigned notification id.
    fn send_notification(
        &self,
        kind: NotificationType,
        message: &str,
        device_id: DeviceId,
    ) -> Result<i64>;

    /// Attach a JPEG-encoded frame to a previously created notification.
    fn attach_image(&self, notification_id: i64, jpeg: &[u8]) -> Result<()>;
}

/// A face known to the backend for one device.
#[derive(Clone, Debug, Deserialize)]
pub struct KnownFace {
    pub name: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// Face registry port: known faces per device plus photo download.
pub trait FaceRegistry {
    fn faces_for_device(&self, device_id: DeviceId) -> Result<Vec<KnownFace>>;

    /// Download one reference photo by URL.
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct NotificationResponse {
    id: i64,
}

/// HTTP client for the backend notification and face-registry endpoints.
pub struct HttpBackendApi {
    base_url: String,
}

impl HttpBackendApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl NotificationApi for HttpBackendApi {
    fn send_notification(
        &self,
        kind: NotificationType,
        message: &str,
        device_id: DeviceId,
    ) -> Result<i64> {
        let response = ureq::post(&self.endpoint(NOTIFICATION_ENDPOINT))
            .send_json(serde_json::json!({
                "type": kind,
                "message": message,
                "deviceId": device_id,
            }))
            .context("post notification")?;
        let body: NotificationResponse = response
            .into_json()
            .context("parse notification response")?;
        Ok(body.id)
    }

    fn attach_image(&self, notification_id: i64, jpeg: &[u8]) -> Result<()> {
        let url = format!(
            "{}?ai-service-notification-id={}",
            self.endpoint(UPLOAD_ENDPOINT),
            notification_id
        );
        ureq::post(&url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(jpeg)
            .context("upload notification image")?;
        Ok(())
    }
}

impl FaceRegistry for HttpBackendApi {
    fn faces_for_device(&self, device_id: DeviceId) -> Result<Vec<KnownFace>> {
        let url = format!("{}?device-id={}", self.endpoint(FACES_ENDPOINT), device_id);
        let response = ureq::get(&url).call().context("fetch known faces")?;
        let faces: Vec<KnownFace> = response.into_json().context("parse known faces")?;
        Ok(faces)
    }

    fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = ureq::get(url)
            .call()
            .with_context(|| format!("fetch face image {}", url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)
            .context("read face image")?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_face_uses_backend_field_names() {
        let face: KnownFace =
            serde_json::from_str(r#"{"name": "alice", "imageUrl": "http://x/alice.jpg"}"#).unwrap();
        assert_eq!(face.name, "alice");
        assert_eq!(face.image_url, "http://x/alice.jpg");
    }

    #[test]
    fn notification_response_parses_id() {
        let body: NotificationResponse = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(body.id, 42);
    }

    #[test]
    fn endpoint_join_tolerates_trailing_slash() {
        let with = HttpBackendApi::new("http://127.0.0.1:8080/");
        let without = HttpBackendApi::new("http://127.0.0.1:8080");
        assert_eq!(
            with.endpoint(NOTIFICATION_ENDPOINT),
            without.endpoint(NOTIFICATION_ENDPOINT)
        );
    }
}
