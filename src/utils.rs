// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions and helper functions.
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Period used for throttling repeated warnings of the control loop: 3 s
pub static LOG_THROTTLE_PERIOD: Duration = Duration::from_millis(3000);

/// Returns true if any element is not exactly zero.
pub fn is_nonzero(values: &[f64]) -> bool {
    values.iter().any(|&x| x != 0.0)
}

/// Returns true if any element is NaN.
pub fn contains_nan(values: &[f64]) -> bool {
    values.iter().any(|x| x.is_nan())
}

/// Removes one row of a matrix and the corresponding element of a vector.
///
/// Does nothing if only one row is left or `row` is out of range.
pub fn remove_dimension(matrix: &mut DMatrix<f64>, vector: &mut DVector<f64>, row: usize) {
    if matrix.nrows() <= 1 || row >= matrix.nrows() {
        return;
    }
    let reduced_matrix = matrix.clone().remove_row(row);
    let reduced_vector = vector.clone().remove_row(row);
    *matrix = reduced_matrix;
    *vector = reduced_vector;
}

/// Limits how often a message is logged from inside a fast loop.
///
/// Every call site uses its own key. A key may log once per period.
#[derive(Debug)]
pub struct LogThrottle {
    period: Duration,
    last_logged: HashMap<&'static str, Instant>,
}

impl LogThrottle {
    pub fn new(period: Duration) -> Self {
        LogThrottle {
            period,
            last_logged: HashMap::new(),
        }
    }

    /// Returns true if the message with `key` should be logged now.
    pub fn ready(&mut self, key: &'static str) -> bool {
        let now = Instant::now();
        match self.last_logged.get(key) {
            Some(last) if now.duration_since(*last) < self.period => false,
            _ => {
                self.last_logged.insert(key, now);
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        LogThrottle::new(LOG_THROTTLE_PERIOD)
    }
}
