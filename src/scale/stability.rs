//! Stability judgment over the last few readings.
//!
//! A weight is considered settled when the last [`WINDOW`] samples agree within
//! [`TOLERANCE`] scale units and span at least [`MIN_SPAN`].
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const WINDOW: usize = 3;
pub const TOLERANCE: f64 = 0.3;
pub const MIN_SPAN: Duration = Duration::from_millis(500);

// Absorbs binary rounding in the tolerance comparison (e.g. 10.3 - 10.0).
const EPSILON: f64 = 1e-9;

#[derive(Debug, Default)]
pub struct StabilityFilter {
    samples: VecDeque<(f64, Instant)>,
}

impl StabilityFilter {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW + 1),
        }
    }

    /// Record a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, value: f64, at: Instant) {
        self.samples.push_back((value, at));
        while self.samples.len() > WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn is_stable(&self) -> bool {
        if self.samples.len() != WINDOW {
            return false;
        }
        let (min, max) = self
            .samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (v, _)| {
                (lo.min(*v), hi.max(*v))
            });
        let span = match (self.samples.front(), self.samples.back()) {
            (Some((_, first)), Some((_, last))) => last.saturating_duration_since(*first),
            _ => return false,
        };
        max - min <= TOLERANCE + EPSILON && span >= MIN_SPAN
    }

    /// Push and judge in one step.
    pub fn observe(&mut self, value: f64, at: Instant) -> bool {
        self.push(value, at);
        self.is_stable()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
