//! Moving-Average Engine - pure trailing-window mean
//!
//! Consumed by the aggregator; no side effects, deterministic, O(K).
//! `Decimal` arithmetic keeps recomputation bit-identical across restarts
//! and redeliveries.

use rust_decimal::Decimal;

/// Outcome of a trailing-mean computation
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMean {
    /// Arithmetic mean of the last `window` values
    Value(Decimal),
    /// Not enough samples to fill the window
    Insufficient { have: usize, need: usize },
}

impl WindowMean {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            WindowMean::Value(v) => Some(*v),
            WindowMean::Insufficient { .. } => None,
        }
    }
}

/// Mean of the last `window` prices in an oldest-to-newest sequence.
///
/// Returns [`WindowMean::Insufficient`] when fewer than `window` values are
/// available (or the window is zero, which can never be satisfied).
pub fn trailing_mean(prices: &[Decimal], window: usize) -> WindowMean {
    if window == 0 || prices.len() < window {
        return WindowMean::Insufficient {
            have: prices.len(),
            need: window,
        };
    }

    let tail = &prices[prices.len() - window..];
    let sum: Decimal = tail.iter().sum();
    WindowMean::Value(sum / Decimal::from(window as u64))
}
