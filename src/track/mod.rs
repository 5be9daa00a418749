//! Object tracker state machine.
//!
//! The tracker maintains three disjoint per-device partitions:
//!
//! - `static_objects`: objects classified as background scenery after
//!   surviving long enough without moving.
//! - `current_objects`: every actively tracked, non-background object.
//! - `new_objects`: ids first observed in the most recent update; fully
//!   replaced on every call, never accumulated.
//!
//! Ids absent from the latest detection batch are dropped outright; the
//! detection engine owns id stability, so there is no lost-object grace
//! period here.

mod classify;

pub use classify::{classify_notification, Notification};

use std::collections::{HashMap, HashSet};

use crate::detect::Observation;
use crate::NotificationType;

pub use crate::detect::BoundingBox;

/// Cycles an object must survive before it can be classified as static.
pub const STATIC_MIN_LIFETIME: u32 = 10;

/// Center movement (px) above which an object is not considered static.
pub const STATIC_BOX_PX_VARIATION: f64 = 20.0;

/// A detection result carrying identity across frames.
#[derive(Clone, Debug)]
pub struct TrackedObject {
    pub id: String,
    pub class_name: String,
    pub confidence: f32,
    pub position: BoundingBox,
    pub last_position: BoundingBox,
    /// Detection cycles this object has survived.
    pub lifetime: u32,
    /// Notification types already emitted for this object. Cleared only when
    /// the object is re-created under a new id.
    pub reported_types: HashSet<NotificationType>,
    pub last_reported_type: Option<NotificationType>,
}

impl TrackedObject {
    pub fn from_observation(obs: Observation) -> Self {
        Self {
            id: obs.track_id,
            class_name: obs.class_name,
            confidence: obs.confidence,
            position: obs.bounds,
            last_position: obs.bounds,
            lifetime: 1,
            reported_types: HashSet::new(),
            last_reported_type: None,
        }
    }

    /// Euclidean distance between the centers of the current and previous
    /// bounding boxes.
    pub fn movement(&self) -> f64 {
        let (cx, cy) = self.position.center();
        let (px, py) = self.last_position.center();
        (cx - px).hypot(cy - py)
    }
}

/// Per-device object tracking state machine.
pub struct Tracker {
    static_objects: Vec<TrackedObject>,
    current_objects: Vec<TrackedObject>,
    new_objects: Vec<String>,
    min_lifetime: u32,
    box_px_variation: f64,
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_thresholds(STATIC_MIN_LIFETIME, STATIC_BOX_PX_VARIATION)
    }

    pub fn with_thresholds(min_lifetime: u32, box_px_variation: f64) -> Self {
        Self {
            static_objects: Vec::new(),
            current_objects: Vec::new(),
            new_objects: Vec::new(),
            min_lifetime,
            box_px_variation,
        }
    }

    /// Objects classified as background scenery.
    pub fn static_objects(&self) -> &[TrackedObject] {
        &self.static_objects
    }

    pub fn static_objects_mut(&mut self) -> &mut [TrackedObject] {
        &mut self.static_objects
    }

    /// Actively tracked, non-background objects (includes this cycle's
    /// brand-new objects).
    pub fn current_objects(&self) -> &[TrackedObject] {
        &self.current_objects
    }

    pub fn current_objects_mut(&mut self) -> &mut [TrackedObject] {
        &mut self.current_objects
    }

    /// Ids first observed in the most recent `update` call.
    pub fn new_ids(&self) -> &[String] {
        &self.new_objects
    }

    pub fn is_new(&self, id: &str) -> bool {
        self.new_objects.iter().any(|n| n == id)
    }

    /// Merge one detection batch into the tracker.
    ///
    /// Already-known ids get position/confidence/lifetime updates and may move
    /// between partitions:
    /// - static objects that moved more than the variation threshold are
    ///   demoted to current with lifetime reset to 1;
    /// - current objects that reached the minimum lifetime while staying
    ///   within the threshold are promoted to static;
    /// - everything else stays where it was.
    ///
    /// Unknown ids land in both `new_objects` and `current_objects`. Known
    /// ids missing from the batch are dropped.
    pub fn update(&mut self, detections: Vec<Observation>) {
        self.new_objects.clear();

        // Index previous-cycle objects by id; the bool records whether the
        // object was in the static partition.
        let mut known: HashMap<String, (TrackedObject, bool)> = HashMap::new();
        for obj in self.current_objects.drain(..) {
            known.insert(obj.id.clone(), (obj, false));
        }
        for obj in self.static_objects.drain(..) {
            known.insert(obj.id.clone(), (obj, true));
        }

        for det in detections {
            match known.remove(&det.track_id) {
                Some((mut obj, was_static)) => {
                    obj.last_position = obj.position;
                    obj.position = det.bounds;
                    obj.confidence = det.confidence;
                    obj.lifetime += 1;
                    let movement = obj.movement();

                    if was_static {
                        if movement > self.box_px_variation {
                            obj.lifetime = 1;
                            self.current_objects.push(obj);
                        } else {
                            self.static_objects.push(obj);
                        }
                    } else if obj.lifetime >= self.min_lifetime
                        && movement <= self.box_px_variation
                    {
                        self.static_objects.push(obj);
                    } else {
                        self.current_objects.push(obj);
                    }
                }
                None => {
                    let obj = TrackedObject::from_observation(det);
                    self.new_objects.push(obj.id.clone());
                    self.current_objects.push(obj);
                }
            }
        }
        // Leftovers in `known` did not reappear and are dropped.
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: &str, class: &str, x1: i32, y1: i32) -> Observation {
        Observation {
            track_id: id.to_string(),
            class_name: class.to_string(),
            confidence: 0.9,
            bounds: BoundingBox::new(x1, y1, x1 + 40, y1 + 40),
        }
    }

    fn ids(objects: &[TrackedObject]) -> Vec<&str> {
        objects.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn partitions_stay_disjoint() {
        let mut tracker = Tracker::new();
        for _ in 0..20 {
            tracker.update(vec![obs("a", "car", 10, 10), obs("b", "person", 200, 10)]);
            let static_ids: HashSet<_> = ids(tracker.static_objects()).into_iter().collect();
            for id in ids(tracker.current_objects()) {
                assert!(!static_ids.contains(id));
            }
        }
    }

    #[test]
    fn promotes_still_object_after_min_lifetime() {
        let mut tracker = Tracker::new();
        for _ in 0..STATIC_MIN_LIFETIME {
            tracker.update(vec![obs("a", "car", 10, 10)]);
        }
        assert_eq!(ids(tracker.static_objects()), vec!["a"]);
        assert!(tracker.current_objects().is_empty());
    }

    #[test]
    fn demotes_moving_static_object_and_resets_lifetime() {
        let mut tracker = Tracker::new();
        for _ in 0..STATIC_MIN_LIFETIME {
            tracker.update(vec![obs("a", "car", 10, 10)]);
        }
        assert_eq!(tracker.static_objects().len(), 1);

        tracker.update(vec![obs("a", "car", 100, 100)]);
        assert!(tracker.static_objects().is_empty());
        assert_eq!(tracker.current_objects()[0].id, "a");
        assert_eq!(tracker.current_objects()[0].lifetime, 1);
    }

    #[test]
    fn static_object_with_small_movement_stays_static() {
        let mut tracker = Tracker::new();
        for _ in 0..STATIC_MIN_LIFETIME {
            tracker.update(vec![obs("a", "car", 10, 10)]);
        }
        tracker.update(vec![obs("a", "car", 15, 10)]);
        assert_eq!(ids(tracker.static_objects()), vec!["a"]);
    }

    #[test]
    fn new_objects_replaced_every_update() {
        let mut tracker = Tracker::new();
        tracker.update(vec![obs("a", "person", 10, 10)]);
        assert_eq!(tracker.new_ids(), ["a".to_string()]);

        tracker.update(vec![obs("a", "person", 12, 10), obs("b", "dog", 300, 10)]);
        assert_eq!(tracker.new_ids(), ["b".to_string()]);
        assert!(!tracker.is_new("a"));

        tracker.update(vec![]);
        assert!(tracker.new_ids().is_empty());
        assert!(tracker.current_objects().is_empty());
    }

    #[test]
    fn missing_ids_are_dropped_without_grace() {
        let mut tracker = Tracker::new();
        tracker.update(vec![obs("a", "person", 10, 10), obs("b", "car", 200, 10)]);
        tracker.update(vec![obs("b", "car", 200, 12)]);
        assert_eq!(ids(tracker.current_objects()), vec!["b"]);
        assert!(tracker.static_objects().is_empty());
    }

    #[test]
    fn lifetime_counts_updates() {
        let mut tracker = Tracker::new();
        tracker.update(vec![obs("a", "person", 10, 10)]);
        tracker.update(vec![obs("a", "person", 12, 10)]);
        tracker.update(vec![obs("a", "person", 14, 10)]);
        assert_eq!(tracker.current_objects()[0].lifetime, 3);
    }
}
