//! 运行配置 - 通过JSON文件调整参数
//!
//! `ServoConfig` 是完整的启动配置; `TuningSettings` 是其中可在运行时
//! 通过远程通道修改的子集.
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::control::smoothing::{validate_breakpoints, Breakpoint};
use crate::control::{
    ActivationSpec, ControlLoopConfig, PredictorReset, PredictorSpec, SmoothingSpec, TargetOffset,
    TargetPriority,
};
use crate::detection::types::{MAX_DECODED, MAX_SURVIVORS};
use crate::detection::Point;
use crate::error::{Result, ServoError};

/// 完整配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值 (严格大于)
    pub iou_threshold: f32,        // NMS IOU阈值 (大于等于即抑制)
    pub max_detections: usize,     // 解码候选上限
    pub max_survivors: usize,      // NMS保留上限

    // === 几何 ===
    pub capture_width: u32,
    pub capture_height: u32,
    pub display_width: u32,
    pub display_height: u32,

    // === 目标 ===
    pub class_names: Vec<String>,    // 模型类别表, 下标即class id
    pub target_classes: Vec<String>, // 需要跟随的类别
    pub target_offset: TargetOffset,
    pub target_priority: TargetPriority,

    // === 控制 ===
    pub x_multiplier: f32,
    pub y_multiplier: f32,
    pub predictor: PredictorSpec,
    pub predictor_reset: PredictorReset,
    pub smoothing: SmoothingSpec,
    pub activation: ActivationSpec,

    // === 调度 ===
    pub tick_period_us: u64,
    pub metrics_interval_ticks: u32,
    pub queue_capacity: usize,

    /// 远程调参地址, 例如 `127.0.0.1:7700`
    pub control_addr: Option<String>,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            iou_threshold: 0.6,
            max_detections: MAX_DECODED,
            max_survivors: MAX_SURVIVORS,

            capture_width: 320,
            capture_height: 320,
            display_width: 1920,
            display_height: 1080,

            class_names: vec!["head".into(), "body".into()],
            target_classes: vec!["head".into()],
            target_offset: TargetOffset::default(),
            target_priority: TargetPriority::default(),

            x_multiplier: 22.0 * 0.5,
            y_multiplier: 22.0 / 1.2 * 0.5,
            predictor: PredictorSpec::default(),
            predictor_reset: PredictorReset::default(),
            smoothing: SmoothingSpec::default(),
            activation: ActivationSpec::default(),

            tick_period_us: 1000,
            metrics_interval_ticks: 1000,
            queue_capacity: 64,

            control_addr: None,
        }
    }
}

impl ServoConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self =
                    serde_json::from_str(&json).map_err(|source| ServoError::ConfigParse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("📝 配置文件不存在, 创建默认配置 {}", path.display());
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(source) => Err(ServoError::ConfigIo {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ServoError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ServoError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// Checks everything that can be checked without the model.
    pub fn validate(&self) -> Result<()> {
        check_unit("confidence_threshold", self.confidence_threshold)?;
        check_unit("iou_threshold", self.iou_threshold)?;
        // 0 would silently discard every detection
        if self.max_detections == 0 || self.max_survivors == 0 {
            return Err(ServoError::Config(
                "max_detections and max_survivors must be positive".into(),
            ));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(ServoError::Config("capture size must be non-zero".into()));
        }
        if self.display_width == 0 || self.display_height == 0 {
            return Err(ServoError::Config("display size must be non-zero".into()));
        }
        if !self.x_multiplier.is_finite() || !self.y_multiplier.is_finite() {
            return Err(ServoError::Config("multipliers must be finite".into()));
        }
        if self.tick_period_us == 0 {
            return Err(ServoError::Config("tick_period_us must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ServoError::Config("queue_capacity must be positive".into()));
        }
        if self.target_classes.is_empty() {
            return Err(ServoError::Config("no target classes".into()));
        }
        self.smoothing.build()?;
        Ok(())
    }

    /// Maps target class names to ids of a model reporting `num_classes`
    /// classes.
    pub fn resolve_target_classes(&self, num_classes: usize) -> Result<Vec<u32>> {
        self.target_classes
            .iter()
            .map(|name| {
                let id = self
                    .class_names
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
                    .ok_or_else(|| ServoError::UnknownTargetClass(name.clone()))?
                    as u32;
                if id as usize >= num_classes {
                    return Err(ServoError::ClassOutOfRange {
                        name: name.clone(),
                        id,
                        classes: num_classes,
                    });
                }
                Ok(id)
            })
            .collect()
    }

    pub fn control_loop_config(&self, target_classes: Vec<u32>) -> ControlLoopConfig {
        ControlLoopConfig {
            tick_period: Duration::from_micros(self.tick_period_us),
            metrics_interval: self.metrics_interval_ticks,
            display_center: Point::new(
                self.display_width as f32 / 2.0,
                self.display_height as f32 / 2.0,
            ),
            x_multiplier: self.x_multiplier,
            y_multiplier: self.y_multiplier,
            target_classes,
            target_offset: self.target_offset,
            priority: self.target_priority,
            predictor: self.predictor.clone(),
            predictor_reset: self.predictor_reset,
            smoothing: self.smoothing.clone(),
            activation: self.activation.clone(),
        }
    }

    /// Runtime-tunable snapshot of this configuration.
    pub fn tuning(&self) -> TuningSettings {
        TuningSettings {
            confidence_threshold: self.confidence_threshold,
            x_sensitivity: self.x_multiplier,
            y_sensitivity: self.y_multiplier,
            breakpoints: self
                .smoothing
                .breakpoints()
                .map(|table| table.iter().map(|bp| [bp.distance, bp.value]).collect())
                .unwrap_or_default(),
            target_box_x_offset: self.target_offset.x,
            target_box_y_offset: self.target_offset.y,
            progress_factor: self.smoothing.progress_factor().unwrap_or(0.0),
        }
    }

    /// Copy of `self` with the tunable fields replaced.
    pub fn with_tuning(&self, settings: &TuningSettings) -> Self {
        let mut next = self.clone();
        next.confidence_threshold = settings.confidence_threshold;
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

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        info!(
            "  置信度: {:.2}  IOU: {:.2}",
            self.confidence_threshold, self.iou_threshold
        );
        info!(
            "  采集区域: {}x{}  显示器: {}x{}",
            self.capture_width, self.capture_height, self.display_width, self.display_height
        );
        info!("  目标类别: {:?}", self.target_classes);
        info!("  预测器: {:?}  重置: {:?}", self.predictor, self.predictor_reset);
        info!("  激活条件: {:?}", self.activation);
        if self.metrics_interval_ticks == 0 {
            warn!("⚠️  metrics_interval_ticks 为 0, 按 1 处理");
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ServoError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// 可运行时调整的参数 (远程通道的JSON格式)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TuningSettings {
    pub confidence_threshold: f32,
    pub x_sensitivity: f32,
    pub y_sensitivity: f32,
    /// `[distance, value]` pairs
    pub breakpoints: Vec<[f32; 2]>,
    pub target_box_x_offset: f32,
    pub target_box_y_offset: f32,
    pub progress_factor: f32,
}

impl Default for TuningSettings {
    fn default() -> Self {
        ServoConfig::default().tuning()
    }
}

impl TuningSettings {
    pub fn breakpoint_table(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .iter()
            .map(|&[distance, value]| Breakpoint::new(distance, value))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        check_unit("ConfidenceThreshold", self.confidence_threshold)?;
        let finite = [
            self.x_sensitivity,
            self.y_sensitivity,
            self.target_box_x_offset,
            self.target_box_y_offset,
            self.progress_factor,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(ServoError::Config("settings must be finite".into()));
        }
        if self.progress_factor < 0.0 {
            return Err(ServoError::Config("ProgressFactor must not be negative".into()));
        }
        if !self.breakpoints.is_empty() {
            validate_breakpoints(&self.breakpoint_table())?;
        }
        Ok(())
    }
}
