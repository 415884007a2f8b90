// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行配置
pub mod control; // 控制系统
pub mod detection; // 检测后处理
pub mod error; // 错误类型
pub mod io; // 外部协作者接口
pub mod pipeline; // 双线程流水线
pub mod remote; // 远程调参
pub mod sim; // 模拟协作者

pub use crate::config::{ServoConfig, TuningSettings};
pub use crate::control::{ControlLoop, ControlLoopConfig, TickOutcome};
pub use crate::detection::{
    non_max_suppression, Detection, DetectionDecoder, InferenceOutput, NonMaxSuppressor, Point,
    RawOutput,
};
pub use crate::error::{Result, ServoError};
pub use crate::io::{
    Actuator, Capture, Frame, FrameSource, InferenceEngine, InputProbe, MouseButton,
};
pub use crate::pipeline::{
    CancellationToken, Collaborators, ConfigMessage, Pipeline, PipelineSummary, SettingsPublisher,
};
