// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测输出解码器
// Raw `[1, 4 + C, N]` model output → candidate detections

use ndarray::{ArrayViewD, Ix3};
use rayon::prelude::*;
use tracing::{trace, warn};

use super::types::{Detection, RawOutput, RawOutputView, CXYWH_OFFSET, MAX_DECODED};
use crate::error::{Result, ServoError};

/// Minimum slots handed to one rayon task.
const MIN_CHUNK_SLOTS: usize = 64;

/// 检测解码器
///
/// The output shape is negotiated once in [`DetectionDecoder::new`]; a frame
/// whose shape no longer matches decodes to nothing. Slots are split into fixed ranges, each
/// range scanned in parallel into its own scratch buffer, and the hits are
/// assembled serially into the caller's preallocated output.
pub struct DetectionDecoder {
    num_classes: usize,
    num_slots: usize,
    frame_width: u32,
    frame_height: u32,
    capacity: usize,
    chunk_size: usize,
    /// (slot, class) hits per slot range
    scratch: Vec<Vec<(usize, u32)>>,
}

impl DetectionDecoder {
    pub fn new(output_shape: &[usize], frame_width: u32, frame_height: u32) -> Result<Self> {
        let (num_classes, num_slots) = match output_shape {
            [1, channels, slots] if *channels > CXYWH_OFFSET && *slots > 0 => {
                (channels - CXYWH_OFFSET, *slots)
            }
            _ => {
                return Err(ServoError::OutputShape {
                    shape: output_shape.to_vec(),
                })
            }
        };

        let tasks = rayon::current_num_threads().max(1) * 4;
        let chunk_size = num_slots.div_ceil(tasks).max(MIN_CHUNK_SLOTS);
        let chunks = num_slots.div_ceil(chunk_size);

        Ok(Self {
            num_classes,
            num_slots,
            frame_width,
            frame_height,
            capacity: MAX_DECODED,
            chunk_size,
            scratch: (0..chunks).map(|_| Vec::with_capacity(chunk_size)).collect(),
        })
    }

    /// Overrides the fixed arena size (default [`MAX_DECODED`]).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decodes every (slot, class) pair whose score is strictly above
    /// `threshold`. `out` is cleared first; candidates past the capacity are
    /// dropped. Returns the number of detections written.
    pub fn decode(&mut self, raw: &RawOutput, threshold: f32, out: &mut Vec<Detection>) -> usize {
        let expected = [1, self.num_classes + CXYWH_OFFSET, self.num_slots];
        if raw.shape() != expected {
            warn!("⚠️  推理输出形状不符: {:?}, 期望 {:?}", raw.shape(), expected);
            out.clear();
            return 0;
        }
        match raw.view() {
            RawOutputView::F32(view) => self.decode_view(view, threshold, out),
            RawOutputView::F16(view) => self.decode_view(view, threshold, out),
        }
    }

    fn decode_view<T>(&mut self, view: ArrayViewD<'_, T>, threshold: f32, out: &mut Vec<Detection>) -> usize
    where
        T: Copy + Into<f32> + Sync,
    {
        out.clear();
        let view = match view.into_dimensionality::<Ix3>() {
            Ok(v) => v,
            Err(_) => return 0,
        };

        let (num_classes, num_slots, chunk_size) = (self.num_classes, self.num_slots, self.chunk_size);

        // 1. 并行扫描: each range only touches its own scratch buffer
        self.scratch
            .par_iter_mut()
            .enumerate()
            .for_each(|(chunk, hits)| {
                hits.clear();
                let start = chunk * chunk_size;
                let end = (start + chunk_size).min(num_slots);
                for slot in start..end {
                    for class in 0..num_classes {
                        let confidence: f32 = view[[0, CXYWH_OFFSET + class, slot]].into();
                        if confidence > threshold {
                            hits.push((slot, class as u32));
                        }
                    }
                }
            });

        // 2. 串行组装
        let mut dropped = 0usize;
        let mut rejected = 0usize;
        for &(slot, class) in self.scratch.iter().flatten() {
            if out.len() >= self.capacity {
                dropped += 1;
                continue;
            }
            let cx: f32 = view[[0, 0, slot]].into();
            let cy: f32 = view[[0, 1, slot]].into();
            let w: f32 = view[[0, 2, slot]].into();
            let h: f32 = view[[0, 3, slot]].into();
            let confidence: f32 = view[[0, CXYWH_OFFSET + class as usize, slot]].into();

            match Detection::from_cxcywh(
                class,
                confidence,
                cx,
                cy,
                w,
                h,
                self.frame_width,
                self.frame_height,
            ) {
                Some(d) => out.push(d),
                None => rejected += 1,
            }
        }

        if dropped > 0 || rejected > 0 {
            trace!(dropped, rejected, kept = out.len(), "decoder discarded candidates");
        }
        out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;
    use ndarray::{Array, IxDyn};

    /// Builds a `[1, 4 + classes, slots]` tensor with the given
    /// (slot, cx, cy, w, h, class, confidence) entries.
    fn tensor(classes: usize, slots: usize, entries: &[(usize, f32, f32, f32, f32, usize, f32)]) -> Array<f32, IxDyn> {
        let mut t = Array::zeros(IxDyn(&[1, CXYWH_OFFSET + classes, slots]));
        for &(slot, cx, cy, w, h, class, conf) in entries {
            t[[0, 0, slot]] = cx;
            t[[0, 1, slot]] = cy;
            t[[0, 2, slot]] = w;
            t[[0, 3, slot]] = h;
            t[[0, CXYWH_OFFSET + class, slot]] = conf;
        }
        t
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(DetectionDecoder::new(&[1, 4, 100], 320, 320).is_err());
        assert!(DetectionDecoder::new(&[2, 6, 100], 320, 320).is_err());
        assert!(DetectionDecoder::new(&[6, 100], 320, 320).is_err());
        let d = DetectionDecoder::new(&[1, 6, 8400], 320, 320).unwrap();
        assert_eq!(d.num_classes(), 2);
        assert_eq!(d.num_slots(), 8400);
    }

    #[test]
    fn test_round_trip_single_detection() {
        let raw = RawOutput::F32(tensor(2, 300, &[(123, 150.0, 80.0, 40.0, 60.0, 1, 0.87)]));
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 1);

        let d = out[0];
        assert_eq!(d.class_id, 1);
        assert!((d.confidence - 0.87).abs() < 1e-6);
        assert!((d.x_min - 130.0).abs() < 1e-5);
        assert!((d.y_min - 50.0).abs() < 1e-5);
        assert!((d.x_max - 170.0).abs() < 1e-5);
        assert!((d.y_max - 110.0).abs() < 1e-5);
        assert_eq!((d.frame_width, d.frame_height), (320, 320));
    }

    #[test]
    fn test_threshold_is_strict() {
        let raw = RawOutput::F32(tensor(1, 10, &[(0, 10.0, 10.0, 4.0, 4.0, 0, 0.5)]));
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 0);
        assert_eq!(decoder.decode(&raw, 0.49, &mut out), 1);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let entries: Vec<_> = (0..200)
            .map(|i| (i, i as f32, 10.0, 5.0, 5.0, i % 3, (i as f32) / 200.0))
            .collect();
        let raw = RawOutput::F32(tensor(3, 200, &entries));
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let count = decoder.decode(&raw, step as f32 / 20.0, &mut out);
            assert!(count <= previous);
            previous = count;
        }
    }

    #[test]
    fn test_capacity_drops_overflow() {
        let entries: Vec<_> = (0..500)
            .map(|i| (i, 10.0, 10.0, 4.0, 4.0, 0, 0.9))
            .collect();
        let raw = RawOutput::F32(tensor(1, 500, &entries));
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320)
            .unwrap()
            .with_capacity(100);
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 100);
    }

    #[test]
    fn test_negative_size_slot_skipped() {
        let raw = RawOutput::F32(tensor(
            1,
            10,
            &[(2, 10.0, 10.0, -4.0, 4.0, 0, 0.9), (3, 20.0, 20.0, 4.0, 4.0, 0, 0.9)],
        ));
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 1);
        assert_eq!(out[0].center().x, 20.0);
    }

    #[test]
    fn test_f16_output() {
        let raw = tensor(2, 64, &[(5, 100.0, 100.0, 20.0, 20.0, 0, 0.75)]).mapv(f16::from_f32);
        let raw = RawOutput::F16(raw);
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.6, &mut out), 1);
        assert_eq!(out[0].x_min, 90.0);
        assert_eq!(out[0].x_max, 110.0);
    }

    #[test]
    fn test_multiple_classes_same_slot() {
        let mut t = tensor(2, 10, &[(4, 50.0, 50.0, 10.0, 10.0, 0, 0.8)]);
        t[[0, CXYWH_OFFSET + 1, 4]] = 0.7;
        let raw = RawOutput::F32(t);
        let mut decoder = DetectionDecoder::new(raw.shape(), 320, 320).unwrap();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[1].class_id, 1);
    }

    #[test]
    fn test_shape_change_decodes_nothing() {
        let raw = RawOutput::F32(tensor(2, 64, &[(5, 100.0, 100.0, 20.0, 20.0, 0, 0.9)]));
        let mut decoder = DetectionDecoder::new(&[1, 6, 128], 320, 320).unwrap();
        let mut out = vec![Detection::from_cxcywh(0, 0.9, 10.0, 10.0, 4.0, 4.0, 320, 320).unwrap()];
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 0);
        assert!(out.is_empty());

        // more classes than negotiated
        let raw = RawOutput::F32(tensor(3, 128, &[(5, 100.0, 100.0, 20.0, 20.0, 2, 0.9)]));
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 0);

        let raw = RawOutput::F32(tensor(2, 128, &[(5, 100.0, 100.0, 20.0, 20.0, 0, 0.9)]));
        assert_eq!(decoder.decode(&raw, 0.5, &mut out), 1);
    }
}
