//! lbm/tracer.rs - Convergence Tracking
//!
//! A value tracer watches a scalar signal (the average lattice kinetic
//! energy) over a sliding window and declares convergence once the relative
//! fluctuation within the window drops below a tolerance.

use std::collections::VecDeque;

/// Sliding-window convergence tracker
#[derive(Debug, Clone)]
pub struct ValueTracer {
    window: usize,
    tolerance: f64,
    values: VecDeque<f64>,
    converged: bool,
}

impl ValueTracer {
    /// Create a tracer with the given window length and relative tolerance
    pub fn new(window: usize, tolerance: f64) -> Self {
        Self {
            window: window.max(2),
            tolerance,
            values: VecDeque::new(),
            converged: false,
        }
    }

    /// Feed the next value of the monitored signal
    pub fn take_value(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.window {
            self.values.pop_front();
        }
        if self.values.len() == self.window {
            let mean = self.values.iter().sum::<f64>() / self.window as f64;
            let variance = self
                .values
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / self.window as f64;
            let deviation = variance.sqrt();
            if mean.abs() > 0.0 {
                if deviation / mean.abs() < self.tolerance {
                    self.converged = true;
                }
            } else if deviation < self.tolerance {
                // A silent lattice counts as converged.
                self.converged = true;
            }
        }
    }

    /// Whether the signal has converged
    pub fn has_converged(&self) -> bool {
        self.converged
    }

    /// Forget the history, e.g. after boundary values changed
    pub fn reset(&mut self) {
        self.values.clear();
        self.converged = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_flat_signal() {
        let mut tracer = ValueTracer::new(10, 1e-3);
        for _ in 0..10 {
            tracer.take_value(1.0);
        }
        assert!(tracer.has_converged());
    }

    #[test]
    fn does_not_converge_on_growing_signal() {
        let mut tracer = ValueTracer::new(10, 1e-3);
        for i in 0..20 {
            tracer.take_value(i as f64);
        }
        assert!(!tracer.has_converged());
    }

    #[test]
    fn reset_clears_history() {
        let mut tracer = ValueTracer::new(5, 1e-3);
        for _ in 0..5 {
            tracer.take_value(1.0);
        }
        assert!(tracer.has_converged());
        tracer.reset();
        assert!(!tracer.has_converged());
    }
}
