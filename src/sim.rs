//! 模拟协作者 (simulated collaborators)
//!
//! 无需显卡/屏幕即可运行整条流水线: 合成帧源、沿圆周运动目标的
//! 合成推理引擎、记录移动的执行器和可脚本化的按键状态.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::detection::types::CXYWH_OFFSET;
use crate::detection::RawOutput;
use crate::io::{Actuator, Capture, Frame, FrameSource, InferenceEngine, InputProbe, MouseButton};

// ========== 帧源 ==========

/// Produces blank frames at a fixed rate and reports `NotAvailable` in
/// between.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    interval: Duration,
    next_at: Option<Instant>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, fps: f32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f32(1.0 / fps.max(1.0)),
            next_at: None,
        }
    }
}

impl FrameSource for SyntheticFrameSource {
    fn capture(&mut self) -> Result<Capture> {
        let now = Instant::now();
        if let Some(next_at) = self.next_at {
            if now < next_at {
                thread::yield_now();
                return Ok(Capture::NotAvailable);
            }
        }
        self.next_at = Some(now + self.interval);
        Ok(Capture::Available(Frame {
            tensor: ArrayD::zeros(IxDyn(&[1, 3, 1, 1])),
            width: self.width,
            height: self.height,
        }))
    }
}

// ========== 推理引擎 ==========

/// 合成目标: a body box with a head box on top, circling the capture
/// center, plus a weaker duplicate of the head for NMS to remove.
pub struct SyntheticEngine {
    shape: [usize; 3],
    frame_width: f32,
    frame_height: f32,
    latency: Duration,
    /// Orbit radius in pixels and angular speed in rad/s.
    radius: f32,
    angular_speed: f32,
    started: Instant,
    rng: StdRng,
}

impl SyntheticEngine {
    /// `classes` must be at least 2: class 0 is the head, class 1 the body.
    pub fn new(frame_width: u32, frame_height: u32, classes: usize, slots: usize) -> Self {
        Self {
            shape: [1, CXYWH_OFFSET + classes.max(2), slots.max(3)],
            frame_width: frame_width as f32,
            frame_height: frame_height as f32,
            latency: Duration::from_millis(4),
            radius: frame_width.min(frame_height) as f32 / 4.0,
            angular_speed: 1.5,
            started: Instant::now(),
            rng: StdRng::seed_from_u64(7),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn write_slot(t: &mut ArrayD<f32>, slot: usize, class: usize, confidence: f32, b: [f32; 4]) {
        for (channel, v) in b.iter().enumerate() {
            t[[0, channel, slot]] = *v;
        }
        t[[0, CXYWH_OFFSET + class, slot]] = confidence;
    }
}

impl InferenceEngine for SyntheticEngine {
    fn output_shape(&self) -> &[usize] {
        &self.shape
    }

    fn run(&mut self, _frame: &Frame) -> Result<RawOutput> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let angle = self.started.elapsed().as_secs_f32() * self.angular_speed;
        let jitter = self.rng.gen_range(-1.5f32..1.5);
        let cx = self.frame_width / 2.0 + self.radius * angle.cos() + jitter;
        let cy = self.frame_height / 2.0 + self.radius * angle.sin() + jitter;

        let mut t = ArrayD::<f32>::zeros(IxDyn(&self.shape));
        let body = [cx, cy + 30.0, 36.0, 80.0];
        let head = [cx, cy - 18.0, 14.0, 16.0];
        Self::write_slot(&mut t, 0, 1, self.rng.gen_range(0.75..0.95), body);
        Self::write_slot(&mut t, 1, 0, self.rng.gen_range(0.85..0.95), head);
        Self::write_slot(&mut t, 2, 0, 0.7, [head[0] + 1.0, head[1], head[2], head[3]]);
        trace!(cx, cy, "synthetic target");
        Ok(t.into())
    }
}

// ========== 执行器 ==========

/// Records every relative move. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    moves: Arc<Mutex<Vec<(i32, i32)>>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn moves(&self) -> Vec<(i32, i32)> {
        self.moves.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Sum of all recorded moves.
    pub fn total(&self) -> (i64, i64) {
        self.moves()
            .iter()
            .fold((0, 0), |(x, y), &(dx, dy)| (x + dx as i64, y + dy as i64))
    }
}

impl Actuator for RecordingActuator {
    fn move_relative(&mut self, dx: i32, dy: i32) {
        if let Ok(mut moves) = self.moves.lock() {
            moves.push((dx, dy));
        }
    }
}

// ========== 按键 ==========

/// Button state shared with a controlling handle. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedInput {
    down: Arc<AtomicU8>,
}

fn mask(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Right => 1 << 1,
        MouseButton::Middle => 1 << 2,
        MouseButton::X1 => 1 << 3,
        MouseButton::X2 => 1 << 4,
    }
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, button: MouseButton) {
        self.down.fetch_or(mask(button), Ordering::SeqCst);
    }

    pub fn release(&self, button: MouseButton) {
        self.down.fetch_and(!mask(button), Ordering::SeqCst);
    }
}

impl InputProbe for ScriptedInput {
    fn is_down(&self, button: MouseButton) -> bool {
        self.down.load(Ordering::SeqCst) & mask(button) != 0
    }
}
