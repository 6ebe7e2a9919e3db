// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the smoothing filters which are applied to the joint positions computed by the servo.

use crate::exception::{ServoException, ServoResult};
use crate::model::JointModelGroup;
use crate::servo::parameters::ServoParameters;
use std::f64::consts::PI;
use tracing::debug;

/// Maximum cutoff frequency: 1000 Hz. At or above this frequency the filter is a passthrough.
pub static MAX_CUTOFF_FREQUENCY: f64 = 1000.0;

/// Name of the first-order low-pass filter in [`create_smoothing_filter`].
pub static LOW_PASS_FILTER_NAME: &str = "low_pass_filter";
/// Name of the filter which does not change its input.
pub static NO_FILTER_NAME: &str = "none";

/// Applies a first-order low-pass filter
///
/// # Arguments
/// * `sample_time` - Sample time constant
/// * `y` - Current value of the signal to be filtered
/// * `y_last` - Value of the signal to be filtered in the previous time step
/// * `cutoff_frequency` - Cutoff frequency of the low-pass filter
/// # Panics
/// This function panics if:
/// * y is infinite or NaN.
/// * y_last is infinite or NaN.
/// * cutoff_frequency is zero, negative, infinite or NaN.
/// * sample_time is negative, infinite or NaN.
/// # Return
/// Filtered value.
pub fn low_pass_filter(sample_time: f64, y: f64, y_last: f64, cutoff_frequency: f64) -> f64 {
    assert!(sample_time.is_sign_positive() && sample_time.is_finite());
    assert!(cutoff_frequency.is_sign_positive() && cutoff_frequency.is_finite());
    assert!(y.is_finite() && y_last.is_finite());
    let gain = sample_time / (sample_time + (1.0 / (2.0 * PI * cutoff_frequency)));
    gain * y + (1. - gain) * y_last
}

/// A filter over the joint positions of a joint group.
///
/// The servo owns its filter. It calls [`do_smoothing`](`Self::do_smoothing`) on every newly
/// computed set of positions and [`reset`](`Self::reset`) whenever it does not move, so no jump
/// occurs when the motion resumes.
pub trait SmoothingFilter: Send {
    /// Prepares the filter for a group with `num_joints` joints.
    fn initialize(&mut self, group: &JointModelGroup, num_joints: usize) -> ServoResult<()>;
    /// Filters `positions` in place. Returns false if the positions could not be filtered.
    fn do_smoothing(&mut self, positions: &mut [f64]) -> bool;
    /// Resets the filter state to `positions`.
    fn reset(&mut self, positions: &[f64]) -> bool;
}

/// First-order low-pass filter on every joint.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    sample_time: f64,
    cutoff_frequency: f64,
    previous: Vec<f64>,
}

impl LowPassFilter {
    pub fn new(sample_time: f64, cutoff_frequency: f64) -> Self {
        LowPassFilter {
            sample_time,
            cutoff_frequency,
            previous: Vec::new(),
        }
    }
}

impl SmoothingFilter for LowPassFilter {
    fn initialize(&mut self, group: &JointModelGroup, num_joints: usize) -> ServoResult<()> {
        if !(self.sample_time > 0. && self.sample_time.is_finite())
            || !(self.cutoff_frequency > 0. && self.cutoff_frequency.is_finite())
        {
            return Err(ServoException::SmoothingPluginException {
                message: format!(
                    "invalid low-pass filter sample time {} or cutoff frequency {}",
                    self.sample_time, self.cutoff_frequency
                ),
            });
        }
        if num_joints != group.variable_count() {
            return Err(ServoException::SmoothingPluginException {
                message: format!(
                    "group {} has {} joints but the filter was asked for {}",
                    group.name,
                    group.variable_count(),
                    num_joints
                ),
            });
        }
        self.previous = vec![0.; num_joints];
        Ok(())
    }

    fn do_smoothing(&mut self, positions: &mut [f64]) -> bool {
        if positions.len() != self.previous.len() {
            return false;
        }
        if self.cutoff_frequency >= MAX_CUTOFF_FREQUENCY {
            self.previous.copy_from_slice(positions);
            return true;
        }
        for (position, previous) in positions.iter_mut().zip(self.previous.iter_mut()) {
            // non-finite values would poison the filter state forever
            if !position.is_finite() {
                continue;
            }
            *position = low_pass_filter(
                self.sample_time,
                *position,
                *previous,
                self.cutoff_frequency,
            );
            *previous = *position;
        }
        true
    }

    fn reset(&mut self, positions: &[f64]) -> bool {
        if positions.len() != self.previous.len() || positions.iter().any(|x| !x.is_finite()) {
            return false;
        }
        self.previous.copy_from_slice(positions);
        true
    }
}

/// Filter which leaves the positions untouched.
#[derive(Debug, Clone, Default)]
pub struct NoSmoothing;

impl SmoothingFilter for NoSmoothing {
    fn initialize(&mut self, _group: &JointModelGroup, _num_joints: usize) -> ServoResult<()> {
        Ok(())
    }

    fn do_smoothing(&mut self, _positions: &mut [f64]) -> bool {
        true
    }

    fn reset(&mut self, _positions: &[f64]) -> bool {
        true
    }
}

/// Creates the smoothing filter named by `smoothing_filter_plugin_name`.
///
/// # Errors
/// * SmoothingPluginException if no filter with that name exists.
pub fn create_smoothing_filter(
    parameters: &ServoParameters,
) -> ServoResult<Box<dyn SmoothingFilter>> {
    let name = parameters.smoothing_filter_plugin_name.as_str();
    debug!("creating smoothing filter {}", name);
    if name == LOW_PASS_FILTER_NAME {
        Ok(Box::new(LowPassFilter::new(
            parameters.publish_period,
            parameters.low_pass_filter_cutoff_frequency,
        )))
    } else if name == NO_FILTER_NAME {
        Ok(Box::new(NoSmoothing))
    } else {
        Err(ServoException::SmoothingPluginException {
            message: format!("Unknown smoothing filter '{}'", name),
        })
    }
}
