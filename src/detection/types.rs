/// 检测系统数据结构定义
/// Data structures shared by the decoder, the suppressor and the control loop
use std::time::Duration;

use half::f16;
use ndarray::{ArrayD, ArrayViewD};

// ========== 公共常量 ==========

/// Channels before the per-class scores: `cx, cy, w, h`.
pub const CXYWH_OFFSET: usize = 4;

/// Decoded candidates kept per frame before suppression.
pub const MAX_DECODED: usize = 1000;

/// Survivors kept per frame after suppression.
pub const MAX_SURVIVORS: usize = 100;

// ========== 数据结构 ==========

/// 二维点 (pixel coordinates inside the capture region)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 检测框 (Detection bounding box)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Detection {
    /// Builds a box from the model's center/size encoding.
    ///
    /// Returns `None` for negative or non-finite sizes so the
    /// `x_min <= x_max`, `y_min <= y_max` invariant always holds.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cxcywh(
        class_id: u32,
        confidence: f32,
        cx: f32,
        cy: f32,
        w: f32,
        h: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let finite = cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite();
        if !finite || w < 0.0 || h < 0.0 {
            return None;
        }
        Some(Self {
            class_id,
            confidence,
            x_min: cx - w / 2.0,
            y_min: cy - h / 2.0,
            x_max: cx + w / 2.0,
            y_max: cy + h / 2.0,
            frame_width,
            frame_height,
        })
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    /// 对角线长度
    pub fn diagonal(&self) -> f32 {
        let (w, h) = (self.width(), self.height());
        (w * w + h * h).sqrt()
    }

    /// Maps a point inside the capture region to display coordinates, the
    /// capture region being centered on `center`.
    pub fn offset_absolute_from_center(&self, target: Point, center: Point) -> Point {
        let left = center.x - self.frame_width as f32 / 2.0;
        let top = center.y - self.frame_height as f32 / 2.0;
        Point::new(left + target.x, top + target.y)
    }

    /// Distance between two points in units of this box's diagonal.
    ///
    /// `None` when the box is degenerate (zero diagonal).
    pub fn distance_units(&self, p1: Point, p2: Point) -> Option<f32> {
        let diagonal = self.diagonal();
        if diagonal <= f32::EPSILON || !diagonal.is_finite() {
            return None;
        }
        Some(p1.distance(&p2) / diagonal)
    }
}

/// 推理结果 (推理线程 → 控制线程)
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    pub detections: Vec<Detection>,
    pub inference_time: Duration,
    pub capture_time: Duration,
}

/// 模型原始输出 `[1, 4 + C, N]`
#[derive(Debug, Clone)]
pub enum RawOutput {
    F32(ArrayD<f32>),
    F16(ArrayD<f16>),
}

impl RawOutput {
    pub fn shape(&self) -> &[usize] {
        match self {
            RawOutput::F32(a) => a.shape(),
            RawOutput::F16(a) => a.shape(),
        }
    }
}

impl From<ArrayD<f32>> for RawOutput {
    fn from(value: ArrayD<f32>) -> Self {
        RawOutput::F32(value)
    }
}

impl From<ArrayD<f16>> for RawOutput {
    fn from(value: ArrayD<f16>) -> Self {
        RawOutput::F16(value)
    }
}

/// Borrowed view used by the decoder.
pub enum RawOutputView<'a> {
    F32(ArrayViewD<'a, f32>),
    F16(ArrayViewD<'a, f16>),
}

impl RawOutput {
    pub fn view(&self) -> RawOutputView<'_> {
        match self {
            RawOutput::F32(a) => RawOutputView::F32(a.view()),
            RawOutput::F16(a) => RawOutputView::F16(a.view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cxcywh() {
        let d = Detection::from_cxcywh(0, 0.9, 100.0, 50.0, 20.0, 10.0, 320, 320).unwrap();
        assert_eq!(d.x_min, 90.0);
        assert_eq!(d.y_min, 45.0);
        assert_eq!(d.x_max, 110.0);
        assert_eq!(d.y_max, 55.0);
        assert_eq!(d.center(), Point::new(100.0, 50.0));
    }

    #[test]
    fn test_negative_size_rejected() {
        assert!(Detection::from_cxcywh(0, 0.9, 10.0, 10.0, -1.0, 5.0, 320, 320).is_none());
        assert!(Detection::from_cxcywh(0, 0.9, 10.0, 10.0, 5.0, f32::NAN, 320, 320).is_none());
    }

    #[test]
    fn test_degenerate_distance_units() {
        let d = Detection::from_cxcywh(0, 0.9, 10.0, 10.0, 0.0, 0.0, 320, 320).unwrap();
        assert!(d
            .distance_units(Point::new(0.0, 0.0), Point::new(3.0, 4.0))
            .is_none());
    }

    #[test]
    fn test_offset_absolute_from_center() {
        let d = Detection::from_cxcywh(0, 0.9, 160.0, 160.0, 10.0, 10.0, 320, 320).unwrap();
        let p = d.offset_absolute_from_center(Point::new(170.0, 150.0), Point::new(960.0, 540.0));
        assert_eq!(p, Point::new(970.0, 530.0));
    }
}
