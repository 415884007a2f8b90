//! 目标位置预测 (latency compensation)
//!
//! - Null:   不预测
//! - Linear: 速度 + 加速度外推
//! - Kalman: 匀速模型卡尔曼滤波
use ndarray::{arr1, arr2, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::detection::Point;

/// 预测器统一接口
pub trait TargetPredictor: Send {
    /// Projects `point` forward by `dt` seconds. `dt <= 0` returns `point`.
    fn predict(&mut self, point: Point, dt: f32) -> Point;

    /// Forgets history. Called when a new detection stream begins.
    fn reset(&mut self);
}

/// 预测器配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorSpec {
    #[default]
    Null,
    Linear,
    Kalman {
        #[serde(default = "default_assumed_fps")]
        assumed_fps: f32,
        #[serde(default = "default_process_noise")]
        process_noise: f32,
        #[serde(default = "default_measurement_noise")]
        measurement_noise: f32,
    },
}

fn default_assumed_fps() -> f32 {
    60.0
}

fn default_process_noise() -> f32 {
    0.1
}

fn default_measurement_noise() -> f32 {
    1.0
}

impl PredictorSpec {
    pub fn build(&self) -> Box<dyn TargetPredictor> {
        match *self {
            PredictorSpec::Null => Box::new(NullPredictor),
            PredictorSpec::Linear => Box::new(LinearPredictor::default()),
            PredictorSpec::Kalman {
                assumed_fps,
                process_noise,
                measurement_noise,
            } => Box::new(KalmanPredictor::new(assumed_fps, process_noise, measurement_noise)),
        }
    }
}

/// 重置策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorReset {
    /// Reset whenever a new inference output is adopted.
    #[default]
    EveryInference,
    /// Reset only when the new output follows a tick without a target.
    TargetLoss,
}

// ========== Null ==========

pub struct NullPredictor;

impl TargetPredictor for NullPredictor {
    fn predict(&mut self, point: Point, _dt: f32) -> Point {
        point
    }

    fn reset(&mut self) {}
}

// ========== Linear ==========

#[derive(Debug, Clone, Copy)]
struct LinearState {
    position: Point,
    /// Unknown until two samples have been seen.
    velocity: Option<Point>,
}

/// 线性外推: `pos + v·dt + ½·a·dt²`
///
/// After a reset the first sample only primes the position and the second
/// only primes the velocity, so a fresh stream never extrapolates from the
/// origin.
#[derive(Debug, Default)]
pub struct LinearPredictor {
    state: Option<LinearState>,
}

impl TargetPredictor for LinearPredictor {
    fn predict(&mut self, point: Point, dt: f32) -> Point {
        if dt <= 0.0 || !dt.is_finite() {
            return point;
        }

        let Some(previous) = self.state else {
            self.state = Some(LinearState {
                position: point,
                velocity: None,
            });
            return point;
        };

        let velocity = Point::new(
            (point.x - previous.position.x) / dt,
            (point.y - previous.position.y) / dt,
        );
        let acceleration = match previous.velocity {
            Some(v) => Point::new((velocity.x - v.x) / dt, (velocity.y - v.y) / dt),
            None => Point::default(),
        };

        self.state = Some(LinearState {
            position: point,
            velocity: Some(velocity),
        });

        Point::new(
            point.x + velocity.x * dt + acceleration.x * dt * dt / 2.0,
            point.y + velocity.y * dt + acceleration.y * dt * dt / 2.0,
        )
    }

    fn reset(&mut self) {
        self.state = None;
    }
}

// ========== Kalman ==========

/// 卡尔曼滤波预测器
/// 状态向量: [x, y, vx, vy]
///
/// The transition matrix uses the assumed tick interval, not the measured
/// `dt`. State is never reset; it self-corrects through measurement updates.
pub struct KalmanPredictor {
    /// 状态转移矩阵
    a: Array2<f64>,
    /// 观测矩阵 (only position is observed)
    h: Array2<f64>,
    /// 过程噪声
    q: Array2<f64>,
    /// 观测噪声
    r: Array2<f64>,
    x: Array1<f64>,
    p: Array2<f64>,
}

impl KalmanPredictor {
    pub fn new(assumed_fps: f32, process_noise: f32, measurement_noise: f32) -> Self {
        let c = 1.0 / assumed_fps.max(f32::EPSILON) as f64;
        let a = arr2(&[
            [1.0, 0.0, c, 0.0],
            [0.0, 1.0, 0.0, c],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let h = arr2(&[[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]]);

        Self {
            a,
            h,
            q: Array2::eye(4) * process_noise as f64,
            r: Array2::eye(2) * measurement_noise as f64,
            x: Array1::zeros(4),
            // large initial uncertainty
            p: Array2::eye(4) * 100.0,
        }
    }

    /// Current `[x, y, vx, vy]` estimate.
    pub fn state(&self) -> [f64; 4] {
        [self.x[0], self.x[1], self.x[2], self.x[3]]
    }
}

fn invert_2x2(m: &Array2<f64>) -> Option<Array2<f64>> {
    let (a, b, c, d) = (m[[0, 0]], m[[0, 1]], m[[1, 0]], m[[1, 1]]);
    let det = a * d - b * c;
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    Some(arr2(&[[d / det, -b / det], [-c / det, a / det]]))
}

impl TargetPredictor for KalmanPredictor {
    fn predict(&mut self, point: Point, dt: f32) -> Point {
        if dt <= 0.0 || !dt.is_finite() {
            return point;
        }

        // 1. 预测
        let x_pred = self.a.dot(&self.x);
        let p_pred = self.a.dot(&self.p).dot(&self.a.t()) + &self.q;

        // 2. 观测更新
        let z = arr1(&[point.x as f64, point.y as f64]);
        let y = z - self.h.dot(&x_pred);
        let s = self.h.dot(&p_pred).dot(&self.h.t()) + &self.r;
        let Some(s_inv) = invert_2x2(&s) else {
            self.x = x_pred;
            self.p = p_pred;
            return point;
        };
        let k = p_pred.dot(&self.h.t()).dot(&s_inv);

        self.x = &x_pred + &k.dot(&y);
        self.p = (Array2::<f64>::eye(4) - k.dot(&self.h)).dot(&p_pred);

        Point::new(self.x[0] as f32, self.x[1] as f32)
    }

    fn reset(&mut self) {}
}
