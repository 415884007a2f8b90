//! 推理线程 (inference worker)
//!
//! capture → run → decode → suppress → 阻塞推入有界队列
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, trace};

use super::{CancellationToken, ConfigMessage};
use crate::detection::{Detection, DetectionDecoder, InferenceOutput, NonMaxSuppressor};
use crate::io::{Capture, FrameSource, InferenceEngine};

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub frames: u64,
    pub skipped: u64,
}

pub struct InferenceWorker {
    source: Box<dyn FrameSource>,
    engine: Box<dyn InferenceEngine>,
    decoder: DetectionDecoder,
    nms: NonMaxSuppressor,
    confidence_threshold: f32,
    output: Sender<InferenceOutput>,
    commands: Option<Receiver<ConfigMessage>>,
    cancel: CancellationToken,
    // 复用的解码缓冲
    decoded: Vec<Detection>,
    summary: WorkerSummary,
}

impl InferenceWorker {
    pub fn new(
        source: Box<dyn FrameSource>,
        engine: Box<dyn InferenceEngine>,
        decoder: DetectionDecoder,
        nms: NonMaxSuppressor,
        confidence_threshold: f32,
        output: Sender<InferenceOutput>,
        cancel: CancellationToken,
    ) -> Self {
        let decoded = Vec::with_capacity(decoder.capacity());
        Self {
            source,
            engine,
            decoder,
            nms,
            confidence_threshold,
            output,
            commands: None,
            cancel,
            decoded,
            summary: WorkerSummary::default(),
        }
    }

    pub fn with_commands(mut self, commands: Receiver<ConfigMessage>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Runs until cancelled or the control loop goes away. Any collaborator
    /// error cancels the whole pipeline. The queue sender is dropped on
    /// return, which completes the queue for the consumer.
    pub fn run(mut self) -> Result<WorkerSummary> {
        info!("🔍 推理线程启动");
        let result = self.run_loop();
        match &result {
            Ok(()) => info!(
                frames = self.summary.frames,
                skipped = self.summary.skipped,
                "🔍 推理线程已停止"
            ),
            Err(e) => {
                error!("❌ 推理线程出错: {:#}", e);
                self.cancel.cancel();
            }
        }
        result.map(|()| self.summary)
    }

    fn run_loop(&mut self) -> Result<()> {
        while !self.cancel.is_cancelled() {
            self.apply_commands();
            let Some(output) = self.step()? else {
                continue;
            };
            // 队列满时阻塞 (背压)
            if self.output.send(output).is_err() {
                info!("控制循环已退出, 推理线程结束");
                break;
            }
        }
        Ok(())
    }

    /// One capture/inference pass. `None` when no frame was available.
    pub fn step(&mut self) -> Result<Option<InferenceOutput>> {
        let capture_start = Instant::now();
        let frame = match self.source.capture().context("frame capture failed")? {
            Capture::Available(frame) => frame,
            Capture::NotAvailable => {
                self.summary.skipped += 1;
                return Ok(None);
            }
        };
        let capture_time = capture_start.elapsed();

        let inference_start = Instant::now();
        let raw = self.engine.run(&frame).context("inference failed")?;
        self.decoder
            .decode(&raw, self.confidence_threshold, &mut self.decoded);
        let mut detections = Vec::new();
        self.nms.suppress(&self.decoded, &mut detections);
        let inference_time = inference_start.elapsed();

        self.summary.frames += 1;
        trace!(
            decoded = self.decoded.len(),
            kept = detections.len(),
            "frame processed"
        );
        Ok(Some(InferenceOutput {
            detections,
            inference_time,
            capture_time,
        }))
    }

    fn apply_commands(&mut self) {
        let Some(commands) = &self.commands else {
            return;
        };
        for message in commands.try_iter() {
            match message {
                ConfigMessage::UpdateSettings(settings) => {
                    self.confidence_threshold = settings.confidence_threshold;
                }
            }
        }
    }
}
