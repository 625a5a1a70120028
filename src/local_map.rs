//! A frame promoted to a keyframe, plus the landmarks observed in its
//! window.

use nalgebra::Vector3;

use crate::frame::Frame;
use crate::ids::{FrameId, LandmarkId, LocalMapId};
use crate::transform::Transform;

/// A landmark reference captured at sealing time, frozen in the local map's
/// robot frame.
#[derive(Clone, Copy, Debug)]
pub struct Item {
    pub landmark: LandmarkId,
    /// `local_map.world_to_robot · landmark.world_coordinates` at sealing
    /// time. Immutable afterward — the graph optimizer only reads it.
    pub robot_coordinates: Vector3<f32>,
}

/// A closure correspondence against an earlier local map.
#[derive(Clone, Copy, Debug)]
pub struct ClosureEdge {
    pub reference: LocalMapId,
    pub transform: Transform,
    pub confidence: f32,
}

/// The extra bookkeeping a [`Frame`] gains when promoted to a keyframe. Kept
/// as a separate struct (rather than subclassing) so the identifier-handle
/// registry can store every frame uniformly and attach this when present —
/// the "LocalMap IS-A Frame in identifier space" design.
#[derive(Clone, Debug)]
pub struct LocalMapExtension {
    /// The contributing frames, in ingestion order, that this local map
    /// summarizes.
    pub window: Vec<FrameId>,
    pub items: Vec<Item>,
    pub closures: Vec<ClosureEdge>,
}

impl LocalMapExtension {
    pub fn new(window: Vec<FrameId>) -> Self {
        Self {
            window,
            items: Vec::new(),
            closures: Vec::new(),
        }
    }

    pub fn add_item(&mut self, landmark: LandmarkId, robot_coordinates: Vector3<f32>) {
        self.items.push(Item {
            landmark,
            robot_coordinates,
        });
    }

    /// Records a closure edge against `reference`. Rejects self-loops: a
    /// closure edge never connects a local map to itself.
    pub fn add_closure(&mut self, own_id: LocalMapId, reference: LocalMapId, transform: Transform, confidence: f32) {
        debug_assert_ne!(own_id, reference, "closure edge cannot reference its own local map");
        self.closures.push(ClosureEdge {
            reference,
            transform,
            confidence,
        });
    }
}

/// A frame, tagged with its local-map extension if it has been promoted.
/// Both live under the same [`crate::ids::FrameId`] / [`LocalMapId`], so
/// promotion replaces the record in place without reassigning identifiers
/// or rewiring predecessor/successor links.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub core: Frame,
    pub local_map_extension: Option<LocalMapExtension>,
}

impl FrameRecord {
    pub fn new(core: Frame) -> Self {
        Self {
            core,
            local_map_extension: None,
        }
    }

    pub fn is_local_map(&self) -> bool {
        self.local_map_extension.is_some()
    }

    /// Promotes this record's frame into a local map anchor, preserving its
    /// identifier and previous/next links.
    pub fn promote(&mut self, extension: LocalMapExtension) {
        self.local_map_extension = Some(extension);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBuilder;

    fn sample_record(id: u64) -> FrameRecord {
        let cam = CameraBuilder::from_simple_intrinsics(500.0, 500.0, 320.0, 240.0).build();
        FrameRecord::new(Frame::new(FrameId(id), Transform::eye(), cam.clone(), cam))
    }

    #[test]
    fn promotion_preserves_identifier_and_links() {
        let mut record = sample_record(3);
        record.core.previous = Some(FrameId(2));
        record.core.next = Some(FrameId(4));

        let extension = LocalMapExtension::new(vec![FrameId(1), FrameId(2), FrameId(3)]);
        record.promote(extension);

        assert!(record.is_local_map());
        assert_eq!(record.core.id, FrameId(3));
        assert_eq!(record.core.previous, Some(FrameId(2)));
        assert_eq!(record.core.next, Some(FrameId(4)));
    }

    #[test]
    #[should_panic(expected = "closure edge cannot reference its own local map")]
    fn closure_to_self_is_rejected() {
        let mut extension = LocalMapExtension::new(vec![FrameId(0)]);
        extension.add_closure(LocalMapId(5), LocalMapId(5), Transform::eye(), 1.0);
    }

    #[test]
    fn items_record_sealing_time_coordinates() {
        let mut extension = LocalMapExtension::new(vec![FrameId(0)]);
        extension.add_item(LandmarkId(7), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(extension.items.len(), 1);
        assert_eq!(extension.items[0].landmark, LandmarkId(7));
    }
}
