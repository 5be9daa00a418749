//! Notification classification policy.
//!
//! Pure decision table over one tracked object and the frame geometry. The
//! only state it touches is the object's own `reported_types` set, which
//! implements the dedup rule: each notification type fires at most once per
//! object lifetime.

use crate::track::TrackedObject;
use crate::NotificationType;

/// Area ratio at which a person counts as being at the door.
const PERSON_VISIT_AREA: f64 = 0.25;
/// Area ratio at which a vehicle counts as approaching the property.
const VEHICLE_WARNING_AREA: f64 = 0.20;
/// Area ratio below which an animal is only worth a log entry.
const SMALL_ANIMAL_AREA: f64 = 0.05;

/// A classified, deduplicated notification ready for the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub kind: NotificationType,
    pub message: String,
}

/// Classify one tracked object against the frame geometry.
///
/// Returns `None` either when no rule matches or when the matching type was
/// already reported for this object; dedup suppression leaves the object
/// untouched.
pub fn classify_notification(
    obj: &mut TrackedObject,
    frame_width: u32,
    frame_height: u32,
    is_static: bool,
    is_new: bool,
) -> Option<Notification> {
    let frame_area = frame_width as u64 * frame_height as u64;
    let area_ratio = if frame_area == 0 {
        0.0
    } else {
        obj.position.area() as f64 / frame_area as f64
    };

    let name = obj.class_name.to_lowercase();

    // Static objects, reported once on appearance.
    if is_static && is_new {
        if matches!(name.as_str(), "package" | "box") {
            return report(
                obj,
                NotificationType::Info,
                "A package was left near the door.".to_string(),
            );
        }
        if matches!(name.as_str(), "car" | "vehicle") {
            return report(
                obj,
                NotificationType::Warning,
                "A vehicle has parked nearby.".to_string(),
            );
        }
        return report(
            obj,
            NotificationType::Info,
            format!("Static object detected: {}", obj.class_name),
        );
    }

    if name == "person" {
        if area_ratio >= PERSON_VISIT_AREA {
            return report(
                obj,
                NotificationType::Visit,
                "Someone is at the door.".to_string(),
            );
        }
        return report(
            obj,
            NotificationType::Info,
            "Person detected at a distance.".to_string(),
        );
    }

    if matches!(name.as_str(), "car" | "vehicle" | "truck") {
        if area_ratio >= VEHICLE_WARNING_AREA {
            return report(
                obj,
                NotificationType::Warning,
                "A vehicle is approaching the property.".to_string(),
            );
        }
        return report(
            obj,
            NotificationType::Log,
            "Vehicle detected in the area.".to_string(),
        );
    }

    if matches!(name.as_str(), "dog" | "cat") {
        if area_ratio < SMALL_ANIMAL_AREA {
            return report(
                obj,
                NotificationType::Log,
                format!("Small {} detected briefly.", name),
            );
        }
        return report(
            obj,
            NotificationType::Info,
            format!("{} detected near the door.", capitalize(&name)),
        );
    }

    if is_new {
        return report(
            obj,
            NotificationType::Info,
            format!("Detected: {}", obj.class_name),
        );
    }

    None
}

fn report(
    obj: &mut TrackedObject,
    kind: NotificationType,
    message: String,
) -> Option<Notification> {
    if obj.reported_types.contains(&kind) {
        return None;
    }
    obj.reported_types.insert(kind);
    obj.last_reported_type = Some(kind);
    Some(Notification { kind, message })
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
