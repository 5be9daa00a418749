//! Pipeline element contract.
//!
//! Every per-frame processing stage implements `PipelineElement`: a frame
//! callback plus stream-lifecycle hooks, with per-device freeze flags shared
//! through the contract rather than re-implemented per element. The manager
//! drives elements in registration order and applies the directives they
//! return, which is how elements coordinate without holding references to
//! each other.

mod face;
mod tracking;

pub use face::{DeviceFaceCache, FaceRecognitionElement, FaceSettings, FACE_ELEMENT_NAME};
pub use tracking::{TrackerSettings, TrackingElement, TRACKING_ELEMENT_NAME};

use std::collections::HashSet;

use anyhow::Result;

use crate::api::NotificationApi;
use crate::frame::Frame;
use crate::DeviceId;

/// Per-device suppression flags for one element.
///
/// Devices default to not frozen; an element freezes itself (or is unfrozen
/// by a peer through the manager) per device id.
#[derive(Debug, Default)]
pub struct FreezeState {
    frozen: HashSet<DeviceId>,
}

impl FreezeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.frozen.contains(&device_id)
    }

    pub fn insert(&mut self, device_id: DeviceId) {
        self.frozen.insert(device_id);
    }

    pub fn remove(&mut self, device_id: DeviceId) {
        self.frozen.remove(&device_id);
    }
}

/// Cross-element coordination request, applied by the manager after the
/// frame fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementDirective {
    /// Unfreeze the named element for one device.
    Unfreeze {
        element: &'static str,
        device_id: DeviceId,
    },
}

/// A unit of per-frame processing with stream-lifecycle hooks.
pub trait PipelineElement {
    /// Stable name used by the manager's named lookup.
    fn name(&self) -> &'static str;

    fn freeze_state(&self) -> &FreezeState;
    fn freeze_state_mut(&mut self) -> &mut FreezeState;

    /// Process one frame for one device. Only called while not frozen for
    /// that device. Errors abort this element for this frame only.
    fn on_frame(&mut self, device_id: DeviceId, frame: &Frame) -> Result<Vec<ElementDirective>>;

    /// A device stream opened; create per-device state.
    fn on_stream_start(&mut self, device_id: DeviceId) -> Result<()>;

    /// A device stream closed; destroy per-device state. Must be a no-op for
    /// devices the element no longer (or never) knew about.
    fn on_stream_end(&mut self, device_id: DeviceId);

    fn is_frozen(&self, device_id: DeviceId) -> bool {
        self.freeze_state().contains(device_id)
    }

    fn freeze(&mut self, device_id: DeviceId) {
        self.freeze_state_mut().insert(device_id);
    }

    fn unfreeze(&mut self, device_id: DeviceId) {
        self.freeze_state_mut().remove(device_id);
    }
}

/// Encode a frame and attach it to a notification, logging (not propagating)
/// failures: a lost evidence image never blocks the stream.
pub(crate) fn attach_frame(api: &dyn NotificationApi, notification_id: i64, frame: &Frame) {
    match frame.encode_jpeg() {
        Ok(jpeg) => {
            if let Err(e) = api.attach_image(notification_id, &jpeg) {
                log::warn!(
                    "image upload failed for notification {}: {:#}",
                    notification_id,
                    e
                );
            }
        }
        Err(e) => log::warn!(
            "frame encode failed for notification {}: {:#}",
            notification_id,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopElement {
        frozen: FreezeState,
    }

    impl PipelineElement for NoopElement {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn freeze_state(&self) -> &FreezeState {
            &self.frozen
        }

        fn freeze_state_mut(&mut self) -> &mut FreezeState {
            &mut self.frozen
        }

        fn on_frame(&mut self, _: DeviceId, _: &Frame) -> Result<Vec<ElementDirective>> {
            Ok(Vec::new())
        }

        fn on_stream_start(&mut self, _: DeviceId) -> Result<()> {
            Ok(())
        }

        fn on_stream_end(&mut self, _: DeviceId) {}
    }

    #[test]
    fn devices_default_to_not_frozen() {
        let element = NoopElement {
            frozen: FreezeState::new(),
        };
        assert!(!element.is_frozen(1));
    }

    #[test]
    fn freeze_flags_are_per_device() {
        let mut element = NoopElement {
            frozen: FreezeState::new(),
        };
        element.freeze(1);
        assert!(element.is_frozen(1));
        assert!(!element.is_frozen(2));

        element.unfreeze(1);
        assert!(!element.is_frozen(1));

        // Unfreezing an unknown device is a no-op.
        element.unfreeze(99);
    }
}
