//! 目标点选择
use serde::{Deserialize, Serialize};

use crate::detection::{Detection, Point};

/// Fractional offsets inside a box, `(0.5, 0.5)` being its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetOffset {
    pub x: f32,
    pub y: f32,
}

impl Default for TargetOffset {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

pub fn select(detection: &Detection, offset: TargetOffset) -> Point {
    Point::new(
        detection.x_min + detection.width() * offset.x,
        detection.y_min + detection.height() * offset.y,
    )
}

/// 目标优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    /// First detection of a target class, in queue order.
    #[default]
    FirstMatch,
    /// Target-class detection whose center is nearest the capture center.
    ClosestToCenter,
}

/// Picks the detection to follow among `detections`, or `None` when no
/// detection belongs to `classes`.
pub fn pick<'a>(
    detections: &'a [Detection],
    classes: &[u32],
    priority: TargetPriority,
) -> Option<&'a Detection> {
    let mut candidates = detections.iter().filter(|d| classes.contains(&d.class_id));
    match priority {
        TargetPriority::FirstMatch => candidates.next(),
        TargetPriority::ClosestToCenter => candidates.min_by(|a, b| {
            let ca = Point::new(a.frame_width as f32 / 2.0, a.frame_height as f32 / 2.0);
            let cb = Point::new(b.frame_width as f32 / 2.0, b.frame_height as f32 / 2.0);
            a.center()
                .distance(&ca)
                .total_cmp(&b.center().distance(&cb))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, cx: f32, cy: f32) -> Detection {
        Detection::from_cxcywh(class_id, 0.9, cx, cy, 20.0, 40.0, 320, 320).unwrap()
    }

    #[test]
    fn test_select_center_and_upper() {
        let d = det(0, 100.0, 100.0);
        assert_eq!(select(&d, TargetOffset::default()), Point::new(100.0, 100.0));
        let p = select(&d, TargetOffset { x: 0.5, y: 0.3 });
        assert_eq!(p.x, 100.0);
        assert!((p.y - 92.0).abs() < 1e-5);
    }

    #[test]
    fn test_first_match_wins() {
        let ds = [det(1, 10.0, 10.0), det(0, 300.0, 300.0), det(0, 160.0, 160.0)];
        let picked = pick(&ds, &[0], TargetPriority::FirstMatch).unwrap();
        assert_eq!(picked.center(), Point::new(300.0, 300.0));
    }

    #[test]
    fn test_closest_to_center() {
        let ds = [det(0, 300.0, 300.0), det(0, 150.0, 170.0), det(1, 160.0, 160.0)];
        let picked = pick(&ds, &[0], TargetPriority::ClosestToCenter).unwrap();
        assert_eq!(picked.center(), Point::new(150.0, 170.0));
    }

    #[test]
    fn test_no_target_class() {
        let ds = [det(1, 10.0, 10.0)];
        assert!(pick(&ds, &[0], TargetPriority::FirstMatch).is_none());
        assert!(pick(&[], &[0], TargetPriority::ClosestToCenter).is_none());
    }
}
