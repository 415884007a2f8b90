// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 闭环控制 (Servo)
///
/// 系统架构:
/// 1. 推理线程: 采集 + 推理 + 解码 + NMS (独立工作线程)
/// 2. 主线程:   固定节拍控制循环
/// 3. 调参线程: TCP 行协议 (可选)
///
/// 采集/推理/执行器/按键均为 `sim` 中的模拟实现.
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yolo_servo::sim::{RecordingActuator, ScriptedInput, SyntheticEngine, SyntheticFrameSource};
use yolo_servo::{CancellationToken, Collaborators, MouseButton, Pipeline, ServoConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Button {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

impl From<Button> for MouseButton {
    fn from(b: Button) -> Self {
        match b {
            Button::Left => MouseButton::Left,
            Button::Right => MouseButton::Right,
            Button::Middle => MouseButton::Middle,
            Button::X1 => MouseButton::X1,
            Button::X2 => MouseButton::X2,
        }
    }
}

/// 闭环控制参数
#[derive(Parser, Debug)]
#[command(author, version, about = "检测 → 预测 → 平滑 → 执行 闭环控制", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "servo_config.json")]
    config: PathBuf,

    /// 运行时长(秒), 不指定则运行到 Ctrl+C
    #[arg(short, long)]
    duration: Option<f64>,

    /// 远程调参地址, 覆盖配置文件, 例如 127.0.0.1:7700
    #[arg(long)]
    control_addr: Option<String>,

    /// 整个运行期间保持按下的按键 (可重复)
    #[arg(long, value_enum)]
    press: Vec<Button>,

    /// 模拟采集帧率
    #[arg(long, default_value_t = 144.0)]
    capture_fps: f32,

    /// 模拟推理耗时(毫秒)
    #[arg(long, default_value_t = 4)]
    latency_ms: u64,
}

/// `--duration` → Duration; negative, NaN, infinite and overflowing values are rejected.
fn run_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("无效的运行时长 {secs}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    let mut config = ServoConfig::load(&args.config)?;
    if args.control_addr.is_some() {
        config.control_addr = args.control_addr.clone();
    }

    info!("🚀 闭环控制启动");
    config.log_summary();

    let cancel = CancellationToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        info!("收到退出信号...");
        c.cancel();
    })?;

    if let Some(secs) = args.duration {
        let run_for = run_duration(secs)?;
        let c = cancel.clone();
        thread::Builder::new()
            .name("timer".into())
            .spawn(move || {
                thread::sleep(run_for);
                c.cancel();
            })?;
    }

    let input = ScriptedInput::new();
    for button in &args.press {
        input.press((*button).into());
    }
    let actuator = RecordingActuator::new();

    let collaborators = Collaborators {
        source: Box::new(SyntheticFrameSource::new(
            config.capture_width,
            config.capture_height,
            args.capture_fps,
        )),
        engine: Box::new(
            SyntheticEngine::new(
                config.capture_width,
                config.capture_height,
                config.class_names.len(),
                // YOLOv8 @320: 2100 anchors
                2100,
            )
            .with_latency(Duration::from_millis(args.latency_ms)),
        ),
        actuator: Box::new(actuator.clone()),
        input: Box::new(input),
    };

    let pipeline = Pipeline::build(&config, collaborators, cancel)?;
    let summary = pipeline.run()?;

    let (x, y) = actuator.total();
    info!(
        frames = summary.worker.frames,
        ticks = summary.control.ticks,
        moves = summary.control.moves,
        total_dx = x,
        total_dy = y,
        "📊 运行结束"
    );
    Ok(())
}
