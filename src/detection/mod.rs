/// 检测系统 (Detection System)
///
/// 推理线程内的后处理:
/// - DetectionDecoder:  原始张量 → 候选框
/// - NonMaxSuppressor: 重叠框去重
pub mod decoder;
pub mod nms;
pub mod types;

pub use decoder::DetectionDecoder;
pub use nms::{iou, non_max_suppression, NonMaxSuppressor};
pub use types::{Detection, InferenceOutput, Point, RawOutput};
