//! doorwatch - per-device video stream manager
//!
//! This crate ingests one video stream per camera device, runs each frame
//! through an ordered pipeline of processing elements, tracks detected objects
//! across frames, and emits deduplicated notifications to a backend when
//! objects of interest appear, persist, or leave.
//!
//! # Architecture
//!
//! - `manager`: owns the device-stream registry, reconciles it against the
//!   external streaming server, and drives the per-frame pipeline fan-out.
//! - `pipeline`: the `PipelineElement` contract plus the two concrete
//!   elements (object tracking, face recognition) and per-device freeze flags.
//! - `track`: the object tracker state machine and the notification
//!   classification policy.
//! - `ingest`: frame sources (UDP RTP/JPEG relay, synthetic, scripted).
//! - `detect` / `face`: narrow ports for the external ML engines, injected at
//!   construction time so the tracking and recognition logic is testable
//!   without real models.
//! - `api` / `registry`: HTTP clients for the backend notification API and
//!   the streaming-registry service.
//!
//! All per-device state is mutated from a single loop thread; see
//! `StreamManager` for the ordering guarantees this relies on.

use serde::Serialize;

pub mod api;
pub mod config;
pub mod detect;
pub mod face;
pub mod frame;
pub mod ingest;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod track;

pub use api::{FaceRegistry, HttpBackendApi, KnownFace, NotificationApi};
pub use detect::{DetectionEngine, Observation, ScriptedDetectionEngine};
pub use face::{FaceEmbedding, FaceEngine, StubFaceEngine};
pub use frame::Frame;
pub use ingest::{
    FrameSource, ScriptedSourceFactory, SourceFactory, SyntheticSourceFactory, UdpSourceFactory,
};
pub use manager::{StreamError, StreamManager};
pub use pipeline::{
    ElementDirective, FaceRecognitionElement, PipelineElement, TrackingElement, FACE_ELEMENT_NAME,
    TRACKING_ELEMENT_NAME,
};
pub use registry::{HttpStreamRegistry, StreamRegistry};
pub use track::{classify_notification, BoundingBox, Notification, TrackedObject, Tracker};

/// Device identifier assigned by the streaming server. One id per camera.
pub type DeviceId = u32;

/// Severity/category tag attached to an emitted notification.
///
/// Serialized by variant name, which is the backend wire format.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
pub enum NotificationType {
    Info,
    Warning,
    /// Reserved for high-trust detections; the current policy never emits it,
    /// but other services share the same backend enum.
    Critical,
    /// A person is at the door.
    Visit,
    /// Low-importance data, filtered by default on the backend but kept.
    Log,
}
