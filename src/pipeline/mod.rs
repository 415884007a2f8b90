/// 控制流水线 (Control Pipeline)
///
/// 双线程架构, 通过有界队列通信:
/// - InferenceWorker: 采集 + 推理 + 解码 + NMS (独立线程)
/// - ControlLoop:     固定节拍控制 (调用线程)
/// - RemoteServer:    远程调参 (可选, 独立线程)
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::config::{ServoConfig, TuningSettings};
use crate::control::control_loop::LoopSummary;
use crate::control::ControlLoop;
use crate::detection::{DetectionDecoder, NonMaxSuppressor};
use crate::error::Result;
use crate::io::{Actuator, FrameSource, InferenceEngine, InputProbe};
use crate::remote::RemoteServer;

pub use worker::{InferenceWorker, WorkerSummary};

// ========== 消息类型定义 ==========

/// 配置更新 (远程服务 → 推理线程 + 控制循环)
#[derive(Clone, Debug)]
pub enum ConfigMessage {
    UpdateSettings(TuningSettings),
}

/// 取消标志, 两个循环每次迭代检查一次
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 参数的唯一写者: 保存当前快照并广播给所有订阅者
pub struct SettingsPublisher {
    current: TuningSettings,
    subscribers: Vec<Sender<ConfigMessage>>,
}

impl SettingsPublisher {
    pub fn new(initial: TuningSettings) -> Self {
        Self {
            current: initial,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<ConfigMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn current(&self) -> &TuningSettings {
        &self.current
    }

    /// Validates and broadcasts `settings`. Subscribers that went away are
    /// forgotten.
    pub fn publish(&mut self, settings: TuningSettings) -> Result<()> {
        settings.validate()?;
        self.subscribers.retain(|tx| {
            tx.send(ConfigMessage::UpdateSettings(settings.clone()))
                .is_ok()
        });
        self.current = settings;
        Ok(())
    }
}

/// 外部协作者
pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub engine: Box<dyn InferenceEngine>,
    pub actuator: Box<dyn Actuator>,
    pub input: Box<dyn InputProbe>,
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub control: LoopSummary,
    pub worker: WorkerSummary,
}

pub struct Pipeline {
    worker: InferenceWorker,
    control: ControlLoop,
    publisher: Option<SettingsPublisher>,
    control_addr: Option<String>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Validates `config` against the engine's output shape and wires both
    /// loops. Every startup error surfaces here.
    pub fn build(
        config: &ServoConfig,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let decoder = DetectionDecoder::new(
            collaborators.engine.output_shape(),
            config.capture_width,
            config.capture_height,
        )?
        .with_capacity(config.max_detections);
        let target_classes = config.resolve_target_classes(decoder.num_classes())?;
        info!(
            classes = decoder.num_classes(),
            slots = decoder.num_slots(),
            targets = ?target_classes,
            "✅ 模型输出已校验"
        );

        let nms = NonMaxSuppressor::new(config.iou_threshold).with_max_survivors(config.max_survivors);
        let (tx, rx) = bounded(config.queue_capacity);

        let mut publisher = SettingsPublisher::new(config.tuning());
        let worker = InferenceWorker::new(
            collaborators.source,
            collaborators.engine,
            decoder,
            nms,
            config.confidence_threshold,
            tx,
            cancel.clone(),
        )
        .with_commands(publisher.subscribe());
        let control = ControlLoop::new(
            config.control_loop_config(target_classes),
            collaborators.actuator,
            collaborators.input,
            rx,
            cancel.clone(),
        )?
        .with_commands(publisher.subscribe());

        Ok(Self {
            worker,
            control,
            publisher: Some(publisher),
            control_addr: config.control_addr.clone(),
            cancel,
        })
    }

    /// Hands the settings writer to the caller instead of the remote server.
    pub fn take_publisher(&mut self) -> Option<SettingsPublisher> {
        self.publisher.take()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the worker on its own thread and the control loop on this one.
    /// Returns once both have stopped and every thread has been joined.
    pub fn run(self) -> anyhow::Result<PipelineSummary> {
        let Pipeline {
            worker,
            control,
            publisher,
            control_addr,
            cancel,
        } = self;

        let remote = match (control_addr, publisher) {
            (Some(addr), Some(publisher)) => Some(
                RemoteServer::bind(&addr, publisher, cancel.clone())
                    .with_context(|| format!("failed to bind control server on {addr}"))?
                    .spawn()?,
            ),
            _ => None,
        };

        let worker_handle = thread::Builder::new()
            .name("inference".into())
            .spawn(move || worker.run())
            .context("failed to spawn inference thread")?;

        let control_summary = control.run();
        cancel.cancel();

        let worker_result = worker_handle
            .join()
            .map_err(|_| anyhow!("inference thread panicked"))?;
        if let Some(handle) = remote {
            if handle.join().is_err() {
                warn!("⚠️  远程调参线程异常退出");
            }
        }

        let worker_summary = worker_result?;
        info!("✅ 流水线已停止");
        Ok(PipelineSummary {
            control: control_summary,
            worker: worker_summary,
        })
    }
}
