//! Value transforms applied between a matched event and its action
//!
//! Pipeline on the raw input `v` with natural range `[lo, hi]`:
//! invert, curve, `x * scale + offset`, clamp, output type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::midi::convert;

/// Value handed to the action sink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Number(f64),
    Bool(bool),
}

impl ActionValue {
    /// Numeric view (`true` = 1.0)
    pub fn as_f64(self) -> f64 {
        match self {
            ActionValue::Number(n) => n,
            ActionValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            ActionValue::Bool(b) => Some(b),
            ActionValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Number(n) => write!(f, "{:.4}", n),
            ActionValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Shape applied to the (possibly inverted) input
#[derive(Debug, Clone, PartialEq)]
pub enum Curve {
    /// Raw input value, unnormalized
    Linear,
    /// `normalized ^ exponent`
    Exponential { exponent: f64 },
    /// Normalized input quantized into `steps.len()` equal buckets
    Stepped { steps: Vec<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamp {
    pub min: f64,
    pub max: f64,
}

/// Type of the value produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Output {
    #[default]
    Number,
    /// `y >= threshold`
    Bool { threshold: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub curve: Curve,
    pub scale: f64,
    pub offset: f64,
    pub clamp: Option<Clamp>,
    /// Flip the input range before any other stage
    pub invert: bool,
    pub output: Output,
}

impl Default for Transform {
    fn default() -> Self {
        Self::linear(1.0, 0.0)
    }
}

impl Transform {
    pub fn linear(scale: f64, offset: f64) -> Self {
        Self {
            curve: Curve::Linear,
            scale,
            offset,
            clamp: None,
            invert: false,
            output: Output::Number,
        }
    }

    pub fn exponential(exponent: f64) -> Self {
        Self {
            curve: Curve::Exponential { exponent },
            ..Self::default()
        }
    }

    pub fn stepped(steps: Vec<f64>) -> Self {
        Self {
            curve: Curve::Stepped { steps },
            ..Self::default()
        }
    }

    /// Linear map of `[lo, hi]` onto 0.0..=1.0, clamped
    pub fn normalized(range: (i32, i32)) -> Self {
        let (lo, hi) = range;
        if hi <= lo {
            return Self::linear(0.0, 0.0).with_clamp(0.0, 1.0);
        }
        let span = f64::from(hi - lo);
        Self::linear(1.0 / span, -f64::from(lo) / span).with_clamp(0.0, 1.0)
    }

    pub fn with_clamp(mut self, min: f64, max: f64) -> Self {
        self.clamp = Some(Clamp { min, max });
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_bool_output(mut self, threshold: f64) -> Self {
        self.output = Output::Bool { threshold };
        self
    }

    /// Run the pipeline on `value` from an input with natural `range`
    pub fn apply(&self, value: i32, range: (i32, i32)) -> ActionValue {
        let (lo, hi) = range;
        let v = value.clamp(lo, hi.max(lo));
        let v = if self.invert { lo + hi - v } else { v };

        let x = match &self.curve {
            Curve::Linear => f64::from(v),
            Curve::Exponential { exponent } => convert::normalize(v, range).powf(*exponent),
            Curve::Stepped { steps } => {
                if steps.is_empty() {
                    0.0
                } else {
                    let n = steps.len();
                    let bucket = (convert::normalize(v, range) * n as f64).floor() as usize;
                    steps[bucket.min(n - 1)]
                }
            }
        };

        let mut y = x * self.scale + self.offset;
        if let Some(Clamp { min, max }) = self.clamp {
            y = y.max(min).min(max);
        }

        match self.output {
            Output::Number => ActionValue::Number(y),
            Output::Bool { threshold } => ActionValue::Bool(y >= threshold),
        }
    }
}
