/// 控制系统 (Control System)
///
/// 固定节拍主循环及其策略组件:
/// - selector:   目标点选择
/// - predictor:  位置预测 (Null / Linear / Kalman)
/// - smoothing:  距离 → 修正系数 (Sigmoid / Sticky / Progressive ...)
/// - activation: 激活条件 (Toggle / ClickOnce / KeyNotDown)
pub mod activation;
pub mod control_loop;
pub mod metrics;
pub mod predictor;
pub mod selector;
pub mod smoothing;

use std::time::Instant;

use crate::io::InputProbe;

pub use activation::{ActivationCondition, ActivationSpec};
pub use control_loop::{ControlLoop, ControlLoopConfig, TickOutcome};
pub use metrics::LoopMetrics;
pub use predictor::{PredictorReset, PredictorSpec, TargetPredictor};
pub use selector::{TargetOffset, TargetPriority};
pub use smoothing::{Breakpoint, SmoothingFunction, SmoothingSpec};

/// Per-tick context handed to the stateful strategies.
pub struct Tick<'a> {
    pub now: Instant,
    pub input: &'a dyn InputProbe,
}
