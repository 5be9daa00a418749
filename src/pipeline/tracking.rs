//! Object tracking pipeline element.
//!
//! Wraps the detection engine and a per-device `Tracker`, classifies each
//! partition after every detection cycle, and ships the resulting
//! notifications with the frame attached as evidence. Detection runs on a
//! throttled cadence; frames arriving between attempts pass through
//! untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::api::NotificationApi;
use crate::detect::DetectionEngine;
use crate::frame::Frame;
use crate::pipeline::{
    attach_frame, ElementDirective, FreezeState, PipelineElement, FACE_ELEMENT_NAME,
};
use crate::track::{
    classify_notification, Notification, Tracker, STATIC_BOX_PX_VARIATION, STATIC_MIN_LIFETIME,
};
use crate::DeviceId;

pub const TRACKING_ELEMENT_NAME: &str = "tracking";

/// Tracking cadence and static-object thresholds.
#[derive(Clone, Debug)]
pub struct TrackerSettings {
    /// Minimum time between detection attempts per device.
    pub detection_interval: Duration,
    pub static_min_lifetime: u32,
    pub static_box_px_variation: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_secs(1),
            static_min_lifetime: STATIC_MIN_LIFETIME,
            static_box_px_variation: STATIC_BOX_PX_VARIATION,
        }
    }
}

struct DeviceTracker {
    tracker: Tracker,
    last_attempt: Instant,
}

/// Pipeline element running detection + object tracking per device.
pub struct TrackingElement {
    engine: Box<dyn DetectionEngine>,
    api: Arc<dyn NotificationApi>,
    settings: TrackerSettings,
    devices: HashMap<DeviceId, DeviceTracker>,
    frozen: FreezeState,
}

impl TrackingElement {
    pub fn new(
        engine: Box<dyn DetectionEngine>,
        api: Arc<dyn NotificationApi>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            engine,
            api,
            settings,
            devices: HashMap::new(),
            frozen: FreezeState::new(),
        }
    }
}

impl PipelineElement for TrackingElement {
    fn name(&self) -> &'static str {
        TRACKING_ELEMENT_NAME
    }

    fn freeze_state(&self) -> &FreezeState {
        &self.frozen
    }

    fn freeze_state_mut(&mut self) -> &mut FreezeState {
        &mut self.frozen
    }

    fn on_frame(&mut self, device_id: DeviceId, frame: &Frame) -> Result<Vec<ElementDirective>> {
        let Some(state) = self.devices.get_mut(&device_id) else {
            return Ok(Vec::new());
        };
        if state.last_attempt.elapsed() < self.settings.detection_interval {
            return Ok(Vec::new());
        }
        state.last_attempt = Instant::now();

        let detections = self.engine.detect(frame)?;
        state.tracker.update(detections);

        let notifications = collect_notifications(&mut state.tracker, frame.width, frame.height);
        let mut directives = Vec::new();
        for (notification, class_name) in notifications {
            if class_name == "person" {
                // Hand the device over to face recognition.
                directives.push(ElementDirective::Unfreeze {
                    element: FACE_ELEMENT_NAME,
                    device_id,
                });
            }
            match self
                .api
                .send_notification(notification.kind, &notification.message, device_id)
            {
                Ok(notification_id) => attach_frame(self.api.as_ref(), notification_id, frame),
                Err(e) => log::warn!("stream {}: notification dropped: {:#}", device_id, e),
            }
        }
        Ok(directives)
    }

    fn on_stream_start(&mut self, device_id: DeviceId) -> Result<()> {
        self.devices.insert(
            device_id,
            DeviceTracker {
                tracker: Tracker::with_thresholds(
                    self.settings.static_min_lifetime,
                    self.settings.static_box_px_variation,
                ),
                last_attempt: Instant::now(),
            },
        );
        log::info!("stream {}: tracking started", device_id);
        Ok(())
    }

    fn on_stream_end(&mut self, device_id: DeviceId) {
        if self.devices.remove(&device_id).is_some() {
            log::info!("stream {}: tracking ended", device_id);
        }
        self.unfreeze(device_id);
    }
}

/// Classify every partition: brand-new objects first, then static, then the
/// rest of the current partition. Returns each notification with the
/// object's lowercase class name so the caller can react to person hits.
fn collect_notifications(
    tracker: &mut Tracker,
    frame_width: u32,
    frame_height: u32,
) -> Vec<(Notification, String)> {
    let mut out = Vec::new();
    let new_ids = tracker.new_ids().to_vec();

    for id in &new_ids {
        // Brand-new objects live in the current partition.
        if let Some(obj) = tracker
            .current_objects_mut()
            .iter_mut()
            .find(|o| o.id == *id)
        {
            if let Some(notification) =
                classify_notification(obj, frame_width, frame_height, false, true)
            {
                out.push((notification, obj.class_name.to_lowercase()));
            }
        }
    }
    for obj in tracker.static_objects_mut() {
        if let Some(notification) =
            classify_notification(obj, frame_width, frame_height, true, false)
        {
            out.push((notification, obj.class_name.to_lowercase()));
        }
    }
    for obj in tracker.current_objects_mut() {
        if new_ids.contains(&obj.id) {
            continue;
        }
        if let Some(notification) =
            classify_notification(obj, frame_width, frame_height, false, false)
        {
            out.push((notification, obj.class_name.to_lowercase()));
        }
    }
    out
}
