//! Buffered cold start followed by exponential moving average.
//!
//! Every model family learns through the same rule: an absent cell collects
//! raw observations until the buffer threshold, then jumps to their mean. A
//! present cell moves a fraction `rate` towards each new observation.

use super::store::Cell;

/// Outcome of one learning step on one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmaStep {
    /// Cell still absent; `samples` observations are buffered.
    Collecting { samples: usize, threshold: usize },
    /// Buffer consumed; the cell now holds the mean of `samples` observations.
    JumpStarted { value: f64, samples: usize },
    Updated { before: f64, after: f64 },
}

impl EmaStep {
    /// Value to write into the cell, if any.
    pub fn new_value(&self) -> Option<f64> {
        match *self {
            EmaStep::Collecting { .. } => None,
            EmaStep::JumpStarted { value, .. } => Some(value),
            EmaStep::Updated { after, .. } => Some(after),
        }
    }

    pub fn is_jump_start(&self) -> bool {
        matches!(self, EmaStep::JumpStarted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedEma {
    pub rate: f64,
    pub threshold: usize,
    /// Upper clamp, e.g. the unit's base cell for per-unit auxiliary reduction.
    pub upper_bound: Option<f64>,
}

impl BufferedEma {
    pub fn new(rate: f64, threshold: usize) -> Self {
        Self {
            rate,
            threshold: threshold.max(1),
            upper_bound: None,
        }
    }

    /// Per-unit families never move faster than `cap`.
    pub fn capped(rate: f64, cap: f64, threshold: usize) -> Self {
        Self::new(rate.min(cap), threshold)
    }

    pub fn with_upper_bound(mut self, bound: f64) -> Self {
        self.upper_bound = Some(bound.max(0.0));
        self
    }

    fn clamp(&self, value: f64) -> f64 {
        let value = value.max(0.0);
        match self.upper_bound {
            Some(bound) => value.min(bound),
            None => value,
        }
    }

    /// Apply one observation. The caller writes `new_value()` back into the
    /// cell and discards the buffer on a jump start.
    pub fn step(&self, current: Cell, buffer: &mut Vec<f64>, observation: f64) -> EmaStep {
        match current {
            Cell::Absent => {
                buffer.push(observation);
                if buffer.len() >= self.threshold {
                    let samples = buffer.len();
                    let mean = buffer.iter().sum::<f64>() / samples as f64;
                    buffer.clear();
                    EmaStep::JumpStarted {
                        value: self.clamp(mean),
                        samples,
                    }
                } else {
                    EmaStep::Collecting {
                        samples: buffer.len(),
                        threshold: self.threshold,
                    }
                }
            }
            Cell::Value(before) => EmaStep::Updated {
                before,
                after: self.clamp(before + self.rate * (observation - before)),
            },
        }
    }
}
