//! 控制主循环 (fixed-cadence control loop)
//!
//! 每个tick:
//! 1. 更新激活条件与平滑函数
//! 2. 非阻塞读取推理队列 (无新数据时沿用上一组检测)
//! 3. 选目标 → 选点 → 预测
//! 4. 若激活: 计算修正量并驱动执行器
//! 5. 自旋等待到tick周期结束
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, info, warn};

use super::activation::{ActivationCondition, ActivationSpec};
use super::metrics::LoopMetrics;
use super::predictor::{PredictorReset, PredictorSpec, TargetPredictor};
use super::selector::{pick, select, TargetOffset, TargetPriority};
use super::smoothing::{SmoothingFunction, SmoothingSpec};
use super::Tick;
use crate::config::TuningSettings;
use crate::detection::{Detection, InferenceOutput, Point};
use crate::error::Result;
use crate::io::{Actuator, InputProbe};
use crate::pipeline::{CancellationToken, ConfigMessage};

/// 首帧等待时的轮询间隔
const FIRST_OUTPUT_POLL: Duration = Duration::from_millis(50);

/// 控制循环参数
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    pub tick_period: Duration,
    /// Ticks between metric flushes.
    pub metrics_interval: u32,
    /// Center of the display the capture region is centered on.
    pub display_center: Point,
    pub x_multiplier: f32,
    pub y_multiplier: f32,
    pub target_classes: Vec<u32>,
    pub target_offset: TargetOffset,
    pub priority: TargetPriority,
    pub predictor: PredictorSpec,
    pub predictor_reset: PredictorReset,
    pub smoothing: SmoothingSpec,
    pub activation: ActivationSpec,
}

impl ControlLoopConfig {
    /// Copy of `self` with the runtime-tunable fields taken from `settings`.
    ///
    /// An empty breakpoint list leaves the table alone. Breakpoints only land
    /// if the smoothing chain has a sticky table, the progress factor only if
    /// it is progressive.
    pub fn with_tuning(&self, settings: &TuningSettings) -> Self {
        let mut next = self.clone();
        next.x_multiplier = settings.x_sensitivity;
        next.y_multiplier = settings.y_sensitivity;
        next.target_offset = TargetOffset {
            x: settings.target_box_x_offset,
            y: settings.target_box_y_offset,
        };
        if !settings.breakpoints.is_empty() {
            next.smoothing.set_breakpoints(settings.breakpoint_table());
        }
        next.smoothing.set_progress_factor(settings.progress_factor);
        next
    }
}

/// 单个tick的决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The last adopted set is empty (or nothing was adopted yet).
    NoDetections,
    /// Detections exist but none belongs to a target class.
    NoTarget,
    /// A target was tracked but the activation gate is closed.
    Gated,
    Moved { dx: i32, dy: i32 },
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub outputs: u64,
    pub moves: u64,
}

pub struct ControlLoop {
    config: ControlLoopConfig,
    predictor: Box<dyn TargetPredictor>,
    smoothing: Box<dyn SmoothingFunction>,
    activation: Box<dyn ActivationCondition>,
    actuator: Box<dyn Actuator>,
    input: Box<dyn InputProbe>,

    detections: Receiver<InferenceOutput>,
    commands: Option<Receiver<ConfigMessage>>,
    cancel: CancellationToken,

    // ========== 运行状态 ==========
    last_detections: Vec<Detection>,
    last_detection_at: Option<Instant>,
    had_target: bool,
    worker_gone: bool,
    metrics: LoopMetrics,
    summary: LoopSummary,
}

impl ControlLoop {
    pub fn new(
        config: ControlLoopConfig,
        actuator: Box<dyn Actuator>,
        input: Box<dyn InputProbe>,
        detections: Receiver<InferenceOutput>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let smoothing = config.smoothing.build()?;
        Ok(Self {
            predictor: config.predictor.build(),
            activation: config.activation.build(),
            smoothing,
            config,
            actuator,
            input,
            detections,
            commands: None,
            cancel,
            last_detections: Vec::new(),
            last_detection_at: None,
            had_target: false,
            worker_gone: false,
            metrics: LoopMetrics::default(),
            summary: LoopSummary::default(),
        })
    }

    /// Receives settings updates, applied at tick boundaries.
    pub fn with_commands(mut self, commands: Receiver<ConfigMessage>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn summary(&self) -> LoopSummary {
        self.summary
    }

    /// Whether the producer side of the queue has been dropped.
    pub fn worker_gone(&self) -> bool {
        self.worker_gone
    }

    /// Runs until cancelled or until the inference worker goes away.
    pub fn run(mut self) -> LoopSummary {
        info!("🎯 控制循环启动, 等待首个推理结果...");
        if !self.wait_for_first_output() {
            info!("🎯 控制循环在首个推理结果前退出");
            self.drain();
            return self.summary;
        }

        let period = self.config.tick_period;
        let interval = u64::from(self.config.metrics_interval.max(1));
        info!(tick_period_us = period.as_micros() as u64, "🎯 控制循环进入节拍");

        while !self.cancel.is_cancelled() {
            let start = Instant::now();
            self.apply_commands();
            self.tick(start);

            if self.worker_gone {
                warn!("⚠️  推理线程已退出, 控制循环结束");
                break;
            }
            if self.summary.ticks % interval == 0 {
                self.metrics.flush();
            }

            while start.elapsed() < period {
                std::hint::spin_loop();
            }
        }

        self.metrics.flush();
        self.drain();
        info!(
            ticks = self.summary.ticks,
            outputs = self.summary.outputs,
            moves = self.summary.moves,
            "🎯 控制循环已停止"
        );
        self.summary
    }

    /// One pass of the decision tree, without the cadence wait.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        self.summary.ticks += 1;

        let ctx = Tick {
            now,
            input: self.input.as_ref(),
        };
        self.activation.update(&ctx);
        self.smoothing.update(&ctx);

        match self.detections.try_recv() {
            Ok(output) => self.adopt(output, now),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.worker_gone = true,
        }

        if self.last_detections.is_empty() {
            self.had_target = false;
            return TickOutcome::NoDetections;
        }

        let Some(target) = pick(
            &self.last_detections,
            &self.config.target_classes,
            self.config.priority,
        ) else {
            self.had_target = false;
            return TickOutcome::NoTarget;
        };
        self.had_target = true;

        let point = select(target, self.config.target_offset);
        let dt = self
            .last_detection_at
            .map(|at| now.saturating_duration_since(at).as_secs_f32())
            .unwrap_or(0.0);
        let predicted = self.predictor.predict(point, dt);

        if !self.activation.should_apply() {
            return TickOutcome::Gated;
        }

        let (dx, dy) = self.correction(target, predicted);
        self.actuator.move_relative(dx, dy);
        self.summary.moves += 1;
        TickOutcome::Moved { dx, dy }
    }

    /// Relative pointer step towards `predicted`, a point in capture
    /// coordinates inside `target`'s frame.
    fn correction(&self, target: &Detection, predicted: Point) -> (i32, i32) {
        let center = self.config.display_center;
        let offset = target.offset_absolute_from_center(predicted, center);
        let factor = match target.distance_units(offset, center) {
            Some(distance) => self.smoothing.calculate(distance, 1.0),
            None => 0.0,
        };
        (
            to_step(self.config.x_multiplier * (offset.x - center.x) * factor),
            to_step(self.config.y_multiplier * (offset.y - center.y) * factor),
        )
    }

    fn adopt(&mut self, output: InferenceOutput, now: Instant) {
        let reset = match self.config.predictor_reset {
            PredictorReset::EveryInference => true,
            PredictorReset::TargetLoss => !self.had_target,
        };
        if reset {
            self.predictor.reset();
        }
        self.metrics
            .record(output.inference_time, output.capture_time);
        self.last_detections = output.detections;
        self.last_detection_at = Some(now);
        self.summary.outputs += 1;
    }

    /// Blocks (cancellably) until the first inference output arrives and
    /// adopts it. `false` if cancelled or the worker went away first.
    fn wait_for_first_output(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.detections.recv_timeout(FIRST_OUTPUT_POLL) {
                Ok(output) => {
                    self.adopt(output, Instant::now());
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker_gone = true;
                    return false;
                }
            }
        }
    }

    fn apply_commands(&mut self) {
        let Some(commands) = &self.commands else {
            return;
        };
        let pending: Vec<ConfigMessage> = commands.try_iter().collect();
        for message in pending {
            match message {
                ConfigMessage::UpdateSettings(settings) => self.apply_settings(&settings),
            }
        }
    }

    /// Applies a settings snapshot. A snapshot whose smoothing chain does not
    /// build is rejected as a whole.
    pub fn apply_settings(&mut self, settings: &TuningSettings) {
        let next = self.config.with_tuning(settings);
        if next.smoothing != self.config.smoothing {
            match next.smoothing.build() {
                Ok(smoothing) => self.smoothing = smoothing,
                Err(e) => {
                    warn!("⚠️  忽略无效的平滑参数: {}", e);
                    return;
                }
            }
        }
        debug!(?settings, "控制参数已更新");
        self.config = next;
    }

    /// Drains the queue until the worker drops its sender.
    fn drain(&mut self) {
        let mut dropped = 0usize;
        for _ in self.detections.iter() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "排空推理队列");
        }
    }
}

fn to_step(value: f32) -> i32 {
    if value.is_finite() {
        value.ceil() as i32
    } else {
        0
    }
}
