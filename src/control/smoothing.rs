//! 平滑函数 (distance → correction factor)
//!
//! 所有实现返回 [0, 1] 范围内的系数; 距离为 0 时返回 0.
//! Progressive wraps any other function and weakens it the longer the hold
//! button stays down.
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::Tick;
use crate::error::{Result, ServoError};
use crate::io::MouseButton;

/// 平滑函数统一接口
pub trait SmoothingFunction: Send {
    /// Correction factor for a normalized `distance`.
    fn calculate(&self, distance: f32, dt: f32) -> f32;

    /// Advances internal timers. Called exactly once per tick.
    fn update(&mut self, tick: &Tick<'_>);
}

/// 断点 `(distance, value)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub distance: f32,
    pub value: f32,
}

impl Breakpoint {
    pub const fn new(distance: f32, value: f32) -> Self {
        Self { distance, value }
    }
}

/// 平滑函数配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingSpec {
    Null,
    Sigmoid {
        steepness: f32,
        cap: f32,
        m: f32,
        n: f32,
    },
    Sticky {
        breakpoints: Vec<Breakpoint>,
    },
    Logarithmic {
        base: f32,
    },
    Progressive {
        progress_factor: f32,
        #[serde(default = "default_hold_button")]
        hold_button: MouseButton,
        inner: Box<SmoothingSpec>,
    },
}

fn default_hold_button() -> MouseButton {
    MouseButton::Left
}

impl Default for SmoothingSpec {
    fn default() -> Self {
        SmoothingSpec::Progressive {
            progress_factor: 4.0,
            hold_button: MouseButton::Left,
            inner: Box::new(SmoothingSpec::Sticky {
                breakpoints: default_breakpoints(),
            }),
        }
    }
}

pub fn default_breakpoints() -> Vec<Breakpoint> {
    vec![
        Breakpoint::new(0.0, 0.0),
        Breakpoint::new(0.1, 0.24),
        Breakpoint::new(0.65, 0.08),
        Breakpoint::new(1.0, 0.01),
        Breakpoint::new(2.0, 0.005),
        Breakpoint::new(5.0, 0.005),
        Breakpoint::new(100.0, 0.00001),
    ]
}

impl SmoothingSpec {
    pub fn build(&self) -> Result<Box<dyn SmoothingFunction>> {
        self.check_parameters()?;
        Ok(match self {
            SmoothingSpec::Null => Box::new(NullSmoothing),
            SmoothingSpec::Sigmoid { steepness, cap, m, n } => {
                Box::new(SigmoidSmoothing::new(*steepness, *cap, *m, *n))
            }
            SmoothingSpec::Sticky { breakpoints } => {
                Box::new(StickySmoothing::new(breakpoints.clone())?)
            }
            SmoothingSpec::Logarithmic { base } => Box::new(LogarithmicSmoothing::new(*base)),
            SmoothingSpec::Progressive {
                progress_factor,
                hold_button,
                inner,
            } => Box::new(ProgressiveSmoothing::new(
                inner.build()?,
                *progress_factor,
                *hold_button,
            )),
        })
    }

    /// Range checks for this level only; `build` recurses into `inner`.
    fn check_parameters(&self) -> Result<()> {
        match self {
            SmoothingSpec::Sigmoid { steepness, cap, m, n } => {
                if !steepness.is_finite() || !cap.is_finite() {
                    return Err(ServoError::Config(format!(
                        "sigmoid steepness and cap must be finite, got {steepness} and {cap}"
                    )));
                }
                // m = 0 divides by zero, n <= 0 makes powf meaningless
                if !(m.is_finite() && *m > 0.0 && n.is_finite() && *n > 0.0) {
                    return Err(ServoError::Config(format!(
                        "sigmoid m and n must be positive, got {m} and {n}"
                    )));
                }
            }
            SmoothingSpec::Logarithmic { base } => {
                if !base.is_finite() || *base < 0.0 {
                    return Err(ServoError::Config(format!(
                        "logarithmic base must be finite and non-negative, got {base}"
                    )));
                }
            }
            SmoothingSpec::Progressive {
                progress_factor, ..
            } => {
                if !progress_factor.is_finite() || *progress_factor < 0.0 {
                    return Err(ServoError::Config(format!(
                        "progress_factor must be finite and non-negative, got {progress_factor}"
                    )));
                }
            }
            SmoothingSpec::Null | SmoothingSpec::Sticky { .. } => {}
        }
        Ok(())
    }

    /// Replaces the breakpoint table of the innermost sticky function, if any.
    pub fn set_breakpoints(&mut self, table: Vec<Breakpoint>) -> bool {
        match self {
            SmoothingSpec::Sticky { breakpoints } => {
                *breakpoints = table;
                true
            }
            SmoothingSpec::Progressive { inner, .. } => inner.set_breakpoints(table),
            _ => false,
        }
    }

    pub fn breakpoints(&self) -> Option<&[Breakpoint]> {
        match self {
            SmoothingSpec::Sticky { breakpoints } => Some(breakpoints),
            SmoothingSpec::Progressive { inner, .. } => inner.breakpoints(),
            _ => None,
        }
    }

    /// Progress factor of the outermost progressive decorator, if any.
    pub fn progress_factor(&self) -> Option<f32> {
        match self {
            SmoothingSpec::Progressive {
                progress_factor, ..
            } => Some(*progress_factor),
            _ => None,
        }
    }

    pub fn set_progress_factor(&mut self, value: f32) -> bool {
        match self {
            SmoothingSpec::Progressive {
                progress_factor, ..
            } => {
                *progress_factor = value;
                true
            }
            _ => false,
        }
    }
}

fn sanitize(factor: f32) -> f32 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

// ========== Null ==========

/// Full correction whenever the target is off center.
pub struct NullSmoothing;

impl SmoothingFunction for NullSmoothing {
    fn calculate(&self, distance: f32, _dt: f32) -> f32 {
        if distance > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn update(&mut self, _tick: &Tick<'_>) {}
}

// ========== Sigmoid ==========

/// `dt · cap / (m · n^(steepness·√d))`
pub struct SigmoidSmoothing {
    steepness: f32,
    cap: f32,
    m: f32,
    n: f32,
}

impl SigmoidSmoothing {
    pub fn new(steepness: f32, cap: f32, m: f32, n: f32) -> Self {
        Self { steepness, cap, m, n }
    }
}

impl SmoothingFunction for SigmoidSmoothing {
    fn calculate(&self, distance: f32, dt: f32) -> f32 {
        if distance <= 0.0 || distance.is_nan() {
            return 0.0;
        }
        sanitize(dt * self.cap / (self.m * self.n.powf(self.steepness * distance.sqrt())))
    }

    fn update(&mut self, _tick: &Tick<'_>) {}
}

// ========== Sticky (断点表) ==========

/// 分段线性插值
///
/// Distances below the first breakpoint or above the last clamp to that
/// breakpoint's value.
pub struct StickySmoothing {
    breakpoints: Vec<Breakpoint>,
}

impl StickySmoothing {
    pub fn new(breakpoints: Vec<Breakpoint>) -> Result<Self> {
        validate_breakpoints(&breakpoints)?;
        Ok(Self { breakpoints })
    }
}

pub fn validate_breakpoints(breakpoints: &[Breakpoint]) -> Result<()> {
    if breakpoints.is_empty() {
        return Err(ServoError::Breakpoints("table is empty".into()));
    }
    if let Some(bp) = breakpoints
        .iter()
        .find(|bp| !bp.distance.is_finite() || !bp.value.is_finite() || bp.distance < 0.0)
    {
        return Err(ServoError::Breakpoints(format!(
            "bad breakpoint ({}, {})",
            bp.distance, bp.value
        )));
    }
    if let Some(pair) = breakpoints
        .windows(2)
        .find(|w| w[1].distance <= w[0].distance)
    {
        return Err(ServoError::Breakpoints(format!(
            "distances must be strictly increasing, got {} then {}",
            pair[0].distance, pair[1].distance
        )));
    }
    Ok(())
}

impl SmoothingFunction for StickySmoothing {
    fn calculate(&self, distance: f32, _dt: f32) -> f32 {
        if distance <= 0.0 || distance.is_nan() {
            return 0.0;
        }

        let first = self.breakpoints[0];
        let last = self.breakpoints[self.breakpoints.len() - 1];
        if distance <= first.distance {
            return sanitize(first.value);
        }
        if distance >= last.distance {
            return sanitize(last.value);
        }

        // first index whose distance is beyond `distance`; never 0 or len here
        let upper = self
            .breakpoints
            .partition_point(|bp| bp.distance <= distance);
        let (lo, hi) = (self.breakpoints[upper - 1], self.breakpoints[upper]);
        let t = (distance - lo.distance) / (hi.distance - lo.distance);
        sanitize(lo.value + (hi.value - lo.value) * t)
    }

    fn update(&mut self, _tick: &Tick<'_>) {}
}

// ========== Logarithmic ==========

/// `base / (1 + ln(1 + d))`
pub struct LogarithmicSmoothing {
    base: f32,
}

impl LogarithmicSmoothing {
    pub fn new(base: f32) -> Self {
        Self { base }
    }
}

impl SmoothingFunction for LogarithmicSmoothing {
    fn calculate(&self, distance: f32, _dt: f32) -> f32 {
        if distance <= 0.0 || distance.is_nan() {
            return 0.0;
        }
        sanitize(self.base / (1.0 + distance.ln_1p()))
    }

    fn update(&mut self, _tick: &Tick<'_>) {}
}

// ========== Progressive (装饰器) ==========

/// 渐进衰减: inner / (1 + progress_factor · t_hold)
///
/// `t_hold` runs from the tick the hold button went down and is zero while
/// it is released.
pub struct ProgressiveSmoothing {
    inner: Box<dyn SmoothingFunction>,
    progress_factor: f32,
    hold_button: MouseButton,
    was_down: bool,
    held_since: Option<Instant>,
    now: Option<Instant>,
}

impl ProgressiveSmoothing {
    pub fn new(inner: Box<dyn SmoothingFunction>, progress_factor: f32, hold_button: MouseButton) -> Self {
        Self {
            inner,
            progress_factor,
            hold_button,
            was_down: false,
            held_since: None,
            now: None,
        }
    }

    /// Seconds the hold button has been continuously down.
    pub fn hold_seconds(&self) -> f32 {
        match (self.held_since, self.now) {
            (Some(since), Some(now)) => now.saturating_duration_since(since).as_secs_f32(),
            _ => 0.0,
        }
    }
}

impl SmoothingFunction for ProgressiveSmoothing {
    fn calculate(&self, distance: f32, dt: f32) -> f32 {
        let smoothing = self.inner.calculate(distance, dt);
        sanitize(smoothing / (1.0 + self.progress_factor * self.hold_seconds()))
    }

    fn update(&mut self, tick: &Tick<'_>) {
        self.inner.update(tick);

        let is_down = tick.input.is_down(self.hold_button);
        if is_down && !self.was_down {
            self.held_since = Some(tick.now);
        } else if !is_down && self.was_down {
            self.held_since = None;
        }
        self.was_down = is_down;
        self.now = Some(tick.now);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn released(_: MouseButton) -> bool {
        false
    }

    fn left_down(b: MouseButton) -> bool {
        b == MouseButton::Left
    }

    fn sticky() -> StickySmoothing {
        StickySmoothing::new(vec![
            Breakpoint::new(0.1, 0.2),
            Breakpoint::new(0.5, 0.6),
            Breakpoint::new(1.0, 0.1),
        ])
        .unwrap()
    }

    #[test]
    fn test_sticky_exact_breakpoints() {
        let s = sticky();
        assert_eq!(s.calculate(0.1, 1.0), 0.2);
        assert_eq!(s.calculate(0.5, 1.0), 0.6);
        assert_eq!(s.calculate(1.0, 1.0), 0.1);
    }

    #[test]
    fn test_sticky_linear_midpoints() {
        let s = sticky();
        assert!((s.calculate(0.3, 1.0) - 0.4).abs() < 1e-6);
        assert!((s.calculate(0.75, 1.0) - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_sticky_clamps_and_zero() {
        let s = sticky();
        assert_eq!(s.calculate(0.0, 1.0), 0.0);
        assert_eq!(s.calculate(0.05, 1.0), 0.2);
        assert_eq!(s.calculate(50.0, 1.0), 0.1);
    }

    #[test]
    fn test_sticky_rejects_bad_tables() {
        assert!(StickySmoothing::new(vec![]).is_err());
        assert!(StickySmoothing::new(vec![
            Breakpoint::new(0.5, 0.1),
            Breakpoint::new(0.5, 0.2)
        ])
        .is_err());
        assert!(StickySmoothing::new(vec![Breakpoint::new(f32::NAN, 0.1)]).is_err());
        assert!(StickySmoothing::new(default_breakpoints()).is_ok());
    }

    #[test]
    fn test_sigmoid() {
        let s = SigmoidSmoothing::new(2.0, 0.10, 0.18, 2.5);
        assert_eq!(s.calculate(0.0, 1.0), 0.0);
        let near = s.calculate(0.04, 1.0);
        let far = s.calculate(1.0, 1.0);
        assert!(near > far);
        let expected = 0.10 / (0.18 * 2.5f32.powf(2.0 * 1.0));
        assert!((far - expected).abs() < 1e-6);
        // factor never leaves [0, 1]
        assert_eq!(SigmoidSmoothing::new(1.0, 2.4, 1.6, 2.0).calculate(0.01, 1.0), 1.0);
    }

    #[test]
    fn test_logarithmic() {
        let s = LogarithmicSmoothing::new(0.5);
        assert_eq!(s.calculate(0.0, 1.0), 0.0);
        assert!((s.calculate(1.0, 1.0) - 0.5 / (1.0 + 2f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn test_progressive_non_increasing_while_held() {
        let mut p = ProgressiveSmoothing::new(Box::new(sticky()), 4.0, MouseButton::Left);
        let start = Instant::now();
        let mut previous = f32::INFINITY;
        for ms in 0..50 {
            let tick = Tick {
                now: start + Duration::from_millis(ms * 20),
                input: &left_down,
            };
            p.update(&tick);
            let factor = p.calculate(0.5, 1.0);
            assert!(factor <= previous);
            previous = factor;
        }
        assert!(previous < 0.6 / 4.0);
    }

    #[test]
    fn test_progressive_resets_on_release() {
        let mut p = ProgressiveSmoothing::new(Box::new(sticky()), 4.0, MouseButton::Left);
        let start = Instant::now();
        p.update(&Tick { now: start, input: &left_down });
        p.update(&Tick {
            now: start + Duration::from_secs(1),
            input: &left_down,
        });
        assert!((p.hold_seconds() - 1.0).abs() < 1e-6);
        assert!((p.calculate(0.5, 1.0) - 0.6 / 5.0).abs() < 1e-6);

        p.update(&Tick {
            now: start + Duration::from_secs(2),
            input: &released,
        });
        assert_eq!(p.hold_seconds(), 0.0);
        assert_eq!(p.calculate(0.5, 1.0), 0.6);
    }

    #[test]
    fn test_build_and_tuning() {
        let mut spec = SmoothingSpec::default();
        assert_eq!(spec.progress_factor(), Some(4.0));
        assert!(spec.set_breakpoints(vec![Breakpoint::new(1.0, 0.5)]));
        assert_eq!(spec.breakpoints(), Some(&[Breakpoint::new(1.0, 0.5)][..]));
        assert!(spec.build().is_ok());

        assert!(spec.set_breakpoints(vec![]));
        assert!(spec.build().is_err());

        let json = r#"{"kind":"progressive","progress_factor":2.0,"inner":{"kind":"sigmoid","steepness":2.0,"cap":0.1,"m":0.18,"n":2.5}}"#;
        let parsed: SmoothingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.progress_factor(), Some(2.0));
        assert!(parsed.breakpoints().is_none());
    }

    #[test]
    fn test_build_rejects_out_of_range_parameters() {
        let progressive = |progress_factor: f32| SmoothingSpec::Progressive {
            progress_factor,
            hold_button: MouseButton::Left,
            inner: Box::new(SmoothingSpec::Sticky {
                breakpoints: vec![Breakpoint::new(0.1, 0.2), Breakpoint::new(1.0, 0.1)],
            }),
        };
        for pf in [-1.0, f32::NAN, f32::INFINITY] {
            assert!(
                matches!(progressive(pf).build(), Err(ServoError::Config(_))),
                "progress_factor {pf}"
            );
        }
        assert!(progressive(0.0).build().is_ok());

        let sigmoid = |steepness: f32, cap: f32, m: f32, n: f32| SmoothingSpec::Sigmoid {
            steepness,
            cap,
            m,
            n,
        };
        assert!(sigmoid(2.0, 0.1, 0.18, 2.5).build().is_ok());
        assert!(sigmoid(2.0, 0.1, 0.0, 2.5).build().is_err());
        assert!(sigmoid(2.0, 0.1, 0.18, 0.0).build().is_err());
        assert!(sigmoid(2.0, 0.1, 0.18, -2.5).build().is_err());
        assert!(sigmoid(f32::NAN, 0.1, 0.18, 2.5).build().is_err());
        assert!(sigmoid(2.0, f32::INFINITY, 0.18, 2.5).build().is_err());

        assert!(SmoothingSpec::Logarithmic { base: -0.5 }.build().is_err());
        assert!(SmoothingSpec::Logarithmic { base: f32::NAN }.build().is_err());
        assert!(SmoothingSpec::Logarithmic { base: 0.0 }.build().is_ok());

        // nested specs are checked too
        let nested = SmoothingSpec::Progressive {
            progress_factor: 1.0,
            hold_button: MouseButton::Left,
            inner: Box::new(sigmoid(2.0, 0.1, 0.0, 2.5)),
        };
        assert!(nested.build().is_err());
    }
}
