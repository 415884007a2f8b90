//! 外部协作者接口 (External collaborators)
//!
//! Frame acquisition, the inference runtime, the pointer actuator and the
//! button-state query live outside this crate. The pipeline only talks to
//! them through these traits.

use anyhow::Result;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::detection::RawOutput;

/// 模型输入帧 (model-ready NCHW tensor)
#[derive(Debug, Clone)]
pub struct Frame {
    pub tensor: ArrayD<f32>,
    pub width: u32,
    pub height: u32,
}

/// 采集结果
#[derive(Debug, Clone)]
pub enum Capture {
    Available(Frame),
    /// No new frame yet. Not an error, the worker retries immediately.
    NotAvailable,
}

/// 帧源
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Capture>;
}

/// 推理引擎
pub trait InferenceEngine: Send {
    /// Negotiated output shape, `[1, 4 + classes, slots]`.
    fn output_shape(&self) -> &[usize];

    fn run(&mut self, frame: &Frame) -> Result<RawOutput>;
}

/// 执行器 (relative pointer movement)
///
/// Fire-and-forget. Failures are the implementation's problem and are
/// expected to be fatal to the process.
pub trait Actuator: Send {
    fn move_relative(&mut self, dx: i32, dy: i32);
}

/// 按键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

/// 按键状态查询
pub trait InputProbe: Send {
    fn is_down(&self, button: MouseButton) -> bool;
}

impl<F> InputProbe for F
where
    F: Fn(MouseButton) -> bool + Send,
{
    fn is_down(&self, button: MouseButton) -> bool {
        self(button)
    }
}
