use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use ndarray::{ArrayD, IxDyn};
use yolo_servo::control::{ActivationSpec, SmoothingSpec};
use yolo_servo::sim::{RecordingActuator, ScriptedInput};
use yolo_servo::{
    CancellationToken, Capture, Collaborators, Frame, FrameSource, InferenceEngine, MouseButton,
    Pipeline, RawOutput, ServoConfig, ServoError,
};

const SHAPE: [usize; 3] = [1, 6, 16];

struct AlwaysFrame;

impl FrameSource for AlwaysFrame {
    fn capture(&mut self) -> Result<Capture> {
        Ok(Capture::Available(Frame {
            tensor: ArrayD::zeros(IxDyn(&[1, 3, 1, 1])),
            width: 320,
            height: 320,
        }))
    }
}

/// Two overlapping class-0 boxes: 0.9 centered at (200, 160) and 0.8
/// centered at (204, 160).
struct OverlapEngine {
    shape: Vec<usize>,
}

impl OverlapEngine {
    fn new() -> Self {
        Self {
            shape: SHAPE.to_vec(),
        }
    }
}

impl InferenceEngine for OverlapEngine {
    fn output_shape(&self) -> &[usize] {
        &self.shape
    }

    fn run(&mut self, _frame: &Frame) -> Result<RawOutput> {
        thread::sleep(Duration::from_millis(1));
        let mut t = ArrayD::<f32>::zeros(IxDyn(&self.shape));
        for (slot, (cx, conf)) in [(204.0, 0.8), (200.0, 0.9)].into_iter().enumerate() {
            t[[0, 0, slot]] = cx;
            t[[0, 1, slot]] = 160.0;
            t[[0, 2, slot]] = 40.0;
            t[[0, 3, slot]] = 40.0;
            t[[0, 4, slot]] = conf;
        }
        Ok(t.into())
    }
}

struct FailingEngine;

impl InferenceEngine for FailingEngine {
    fn output_shape(&self) -> &[usize] {
        &SHAPE
    }

    fn run(&mut self, _frame: &Frame) -> Result<RawOutput> {
        bail!("model crashed")
    }
}

fn config(activation: ActivationSpec) -> ServoConfig {
    ServoConfig {
        x_multiplier: 1.0,
        y_multiplier: 1.0,
        smoothing: SmoothingSpec::Null,
        activation,
        ..ServoConfig::default()
    }
}

fn collaborators(
    engine: Box<dyn InferenceEngine>,
    actuator: &RecordingActuator,
    input: &ScriptedInput,
) -> Collaborators {
    Collaborators {
        source: Box::new(AlwaysFrame),
        engine,
        actuator: Box::new(actuator.clone()),
        input: Box::new(input.clone()),
    }
}

fn cancel_after(cancel: &CancellationToken, after: Duration) {
    let cancel = cancel.clone();
    thread::spawn(move || {
        thread::sleep(after);
        cancel.cancel();
    });
}

#[test]
fn test_overlap_keeps_highest_confidence_end_to_end() {
    let actuator = RecordingActuator::new();
    let input = ScriptedInput::new();
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::build(
        &config(ActivationSpec::Always),
        collaborators(Box::new(OverlapEngine::new()), &actuator, &input),
        cancel.clone(),
    )
    .unwrap();
    cancel_after(&cancel, Duration::from_millis(200));
    let summary = pipeline.run().unwrap();

    assert!(summary.worker.frames > 0);
    assert!(summary.control.outputs > 0);
    let moves = actuator.moves();
    assert!(!moves.is_empty());
    // display center 960 ↔ capture x 160; the 0.9 box sits 40 px right
    assert!(moves.iter().all(|&m| m == (40, 0)), "{moves:?}");
}

#[test]
fn test_closed_gate_never_moves() {
    let actuator = RecordingActuator::new();
    let input = ScriptedInput::new();
    // hold X2 while the gate listens on X1
    input.press(MouseButton::X2);
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::build(
        &config(ActivationSpec::Toggle {
            button: MouseButton::X1,
        }),
        collaborators(Box::new(OverlapEngine::new()), &actuator, &input),
        cancel.clone(),
    )
    .unwrap();
    cancel_after(&cancel, Duration::from_millis(100));
    let summary = pipeline.run().unwrap();

    assert!(summary.control.ticks > 0);
    assert_eq!(summary.control.moves, 0);
    assert!(actuator.moves().is_empty());
}

#[test]
fn test_engine_error_stops_pipeline() {
    let actuator = RecordingActuator::new();
    let input = ScriptedInput::new();
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::build(
        &config(ActivationSpec::Always),
        collaborators(Box::new(FailingEngine), &actuator, &input),
        cancel.clone(),
    )
    .unwrap();

    let started = Instant::now();
    let err = pipeline.run().unwrap_err();
    assert!(format!("{err:#}").contains("model crashed"));
    assert!(cancel.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(actuator.moves().is_empty());
}

#[test]
fn test_startup_validation() {
    let actuator = RecordingActuator::new();
    let input = ScriptedInput::new();

    struct BadShape;
    impl InferenceEngine for BadShape {
        fn output_shape(&self) -> &[usize] {
            &[1, 84]
        }
        fn run(&mut self, _frame: &Frame) -> Result<RawOutput> {
            unreachable!()
        }
    }
    let err = Pipeline::build(
        &ServoConfig::default(),
        collaborators(Box::new(BadShape), &actuator, &input),
        CancellationToken::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ServoError::OutputShape { .. }));

    let mut unknown = ServoConfig::default();
    unknown.target_classes = vec!["drone".into()];
    let err = Pipeline::build(
        &unknown,
        collaborators(Box::new(OverlapEngine::new()), &actuator, &input),
        CancellationToken::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ServoError::UnknownTargetClass(_)));
}

#[test]
fn test_published_settings_reach_control_loop() {
    let actuator = RecordingActuator::new();
    let input = ScriptedInput::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::build(
        &config(ActivationSpec::Always),
        collaborators(Box::new(OverlapEngine::new()), &actuator, &input),
        cancel.clone(),
    )
    .unwrap();
    let mut publisher = pipeline.take_publisher().unwrap();
    let mut settings = publisher.current().clone();
    settings.x_sensitivity = 0.5;
    // published before the loops start: applied on the first iteration
    publisher.publish(settings).unwrap();

    cancel_after(&cancel, Duration::from_millis(100));
    pipeline.run().unwrap();

    let moves = actuator.moves();
    assert!(!moves.is_empty());
    assert!(moves.iter().all(|&m| m == (20, 0)), "{moves:?}");
}
