// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 非极大值抑制 (Non-Maximum Suppression)

use super::types::{Detection, MAX_SURVIVORS};

/// Intersection over union of two axis-aligned boxes.
///
/// Degenerate unions yield 0 instead of dividing by zero.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x_min.max(b.x_min);
    let y1 = a.y_min.max(b.y_min);
    let x2 = a.x_max.min(b.x_max);
    let y2 = a.y_max.min(b.y_max);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }

    intersection / union
}

/// 非极大值抑制器
///
/// Greedy suppression in descending confidence order (stable for ties).
/// A detection is suppressed when its IoU with an earlier survivor is
/// `>= iou_threshold`. Survivors keep their original relative order.
pub struct NonMaxSuppressor {
    iou_threshold: f32,
    max_survivors: usize,
    order: Vec<usize>,
    suppressed: Vec<bool>,
}

impl NonMaxSuppressor {
    pub fn new(iou_threshold: f32) -> Self {
        Self {
            iou_threshold,
            max_survivors: MAX_SURVIVORS,
            order: Vec::new(),
            suppressed: Vec::new(),
        }
    }

    pub fn with_max_survivors(mut self, max_survivors: usize) -> Self {
        self.max_survivors = max_survivors;
        self
    }

    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    pub fn suppress(&mut self, detections: &[Detection], out: &mut Vec<Detection>) {
        out.clear();
        if detections.is_empty() {
            return;
        }

        self.order.clear();
        self.order.extend(0..detections.len());
        // sort_by is stable: equal confidences keep their input order
        self.order.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .total_cmp(&detections[a].confidence)
        });

        self.suppressed.clear();
        self.suppressed.resize(detections.len(), false);

        let mut kept = 0usize;
        for i in 0..self.order.len() {
            let current = self.order[i];
            if self.suppressed[current] {
                continue;
            }
            if kept == self.max_survivors {
                self.suppressed[current] = true;
                continue;
            }
            kept += 1;

            for &other in &self.order[i + 1..] {
                if !self.suppressed[other]
                    && iou(&detections[current], &detections[other]) >= self.iou_threshold
                {
                    self.suppressed[other] = true;
                }
            }
        }

        out.extend(
            detections
                .iter()
                .zip(&self.suppressed)
                .filter(|(_, &s)| !s)
                .map(|(d, _)| *d),
        );
    }
}

/// One-shot convenience wrapper around [`NonMaxSuppressor`].
pub fn non_max_suppression(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut out = Vec::with_capacity(detections.len());
    NonMaxSuppressor::new(iou_threshold).suppress(detections, &mut out);
    out
}
