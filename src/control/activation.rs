//! 激活条件 (activation gate)
//!
//! 两阶段协议: 每个tick先 `update` 采样按键, 再 `should_apply` 查询.
use serde::{Deserialize, Serialize};

use super::Tick;
use crate::io::MouseButton;

pub trait ActivationCondition: Send {
    /// Samples the input once for this tick.
    fn update(&mut self, tick: &Tick<'_>);

    /// Whether a correction is applied this tick. Pure query.
    fn should_apply(&self) -> bool;
}

/// 激活条件配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationSpec {
    /// Flips on every press.
    Toggle { button: MouseButton },
    /// Only the tick on which the button goes down.
    ClickOnce { button: MouseButton },
    /// Whenever the button is not held.
    KeyNotDown { button: MouseButton },
    Always,
}

impl Default for ActivationSpec {
    fn default() -> Self {
        ActivationSpec::Toggle {
            button: MouseButton::X1,
        }
    }
}

impl ActivationSpec {
    pub fn build(&self) -> Box<dyn ActivationCondition> {
        match *self {
            ActivationSpec::Toggle { button } => Box::new(ToggleActivation::new(button)),
            ActivationSpec::ClickOnce { button } => Box::new(ClickOnceActivation::new(button)),
            ActivationSpec::KeyNotDown { button } => Box::new(KeyNotDownActivation::new(button)),
            ActivationSpec::Always => Box::new(AlwaysActive),
        }
    }
}

// ========== Toggle ==========

pub struct ToggleActivation {
    button: MouseButton,
    was_down: bool,
    toggled: bool,
}

impl ToggleActivation {
    pub fn new(button: MouseButton) -> Self {
        Self {
            button,
            was_down: false,
            toggled: false,
        }
    }
}

impl ActivationCondition for ToggleActivation {
    fn update(&mut self, tick: &Tick<'_>) {
        let is_down = tick.input.is_down(self.button);
        if is_down && !self.was_down {
            self.toggled = !self.toggled;
        }
        self.was_down = is_down;
    }

    fn should_apply(&self) -> bool {
        self.toggled
    }
}

// ========== ClickOnce (边沿触发) ==========

pub struct ClickOnceActivation {
    button: MouseButton,
    previous: bool,
    current: bool,
}

impl ClickOnceActivation {
    pub fn new(button: MouseButton) -> Self {
        Self {
            button,
            previous: false,
            current: false,
        }
    }
}

impl ActivationCondition for ClickOnceActivation {
    fn update(&mut self, tick: &Tick<'_>) {
        self.previous = self.current;
        self.current = tick.input.is_down(self.button);
    }

    fn should_apply(&self) -> bool {
        self.current && !self.previous
    }
}

// ========== KeyNotDown (电平反相) ==========

pub struct KeyNotDownActivation {
    button: MouseButton,
    is_down: bool,
}

impl KeyNotDownActivation {
    pub fn new(button: MouseButton) -> Self {
        Self {
            button,
            is_down: false,
        }
    }
}

impl ActivationCondition for KeyNotDownActivation {
    fn update(&mut self, tick: &Tick<'_>) {
        self.is_down = tick.input.is_down(self.button);
    }

    fn should_apply(&self) -> bool {
        !self.is_down
    }
}

// ========== Always ==========

pub struct AlwaysActive;

impl ActivationCondition for AlwaysActive {
    fn update(&mut self, _tick: &Tick<'_>) {}

    fn should_apply(&self) -> bool {
        true
    }
}
