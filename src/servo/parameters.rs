// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the configuration of the servo.
//!
//! Parameters are read once when the servo is created. The only value which can change while
//! the servo is running is the command frame, see
//! [`ParameterUpdate`](`crate::servo::ParameterUpdate`).
use crate::exception::{create_configuration_exception, ServoException, ServoResult};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

/// Unit of incoming commands.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CommandInType {
    /// Every component is in \[-1, 1\] and scaled by the configured scale.
    Unitless,
    /// Components are in m/s and rad/s.
    SpeedUnits,
}

/// Shape of the outgoing joint command.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutType {
    /// A joint trajectory with a single point.
    JointTrajectory,
    /// A flat array with either positions or velocities.
    Float64MultiArray,
}

/// Used to decide whether to enforce realtime mode for the servo thread.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

/// Gains applied to unitless commands.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct ScaleParameters {
    /// Max linear velocity in \[m/s\].
    pub linear: f64,
    /// Max angular velocity in \[rad/s\].
    pub rotational: f64,
    /// Max joint velocity in \[rad/s\].
    pub joint: f64,
}

impl Default for ScaleParameters {
    fn default() -> Self {
        ScaleParameters {
            linear: 0.4,
            rotational: 0.8,
            joint: 0.5,
        }
    }
}

/// Static configuration of the servo.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServoParameters {
    /// Joint group which is servoed.
    pub move_group_name: String,
    /// Frame in which the Jacobian is evaluated and commands are resolved.
    pub planning_frame: String,
    /// Frame of the end effector.
    pub ee_frame_name: String,
    /// Default frame of incoming Cartesian commands. Can be changed at runtime.
    pub robot_link_command_frame: String,
    /// Control period in \[s\].
    pub publish_period: f64,
    pub command_in_type: CommandInType,
    pub command_out_type: CommandOutType,
    pub publish_joint_positions: bool,
    pub publish_joint_velocities: bool,
    pub publish_joint_accelerations: bool,
    pub scale: ScaleParameters,
    /// Condition number at which the motion towards a singularity starts slowing down.
    pub lower_singularity_threshold: f64,
    /// Condition number at which the motion towards a singularity is stopped.
    pub hard_stop_singularity_threshold: f64,
    /// Distance to a position limit in \[rad\] or \[m\] at which a joint is halted.
    pub joint_limit_margin: f64,
    /// Commands older than this in \[s\] are stale.
    pub incoming_command_timeout: f64,
    /// Number of halt messages sent after all commands became zero. 0 means never stop
    /// publishing.
    pub num_outgoing_halt_msgs_to_publish: u32,
    pub halt_all_joints_in_joint_mode: bool,
    pub halt_all_joints_in_cartesian_mode: bool,
    /// Compute a new command as soon as one arrives instead of running at a fixed rate.
    pub low_latency_mode: bool,
    /// Name of the smoothing filter, see
    /// [`create_smoothing_filter`](`crate::servo::create_smoothing_filter`).
    pub smoothing_filter_plugin_name: String,
    /// Cutoff frequency of the low-pass smoothing filter in \[Hz\].
    pub low_pass_filter_cutoff_frequency: f64,
    /// Repeat the output point several times, for simulated controllers which drop points
    /// with stamps in the past.
    pub use_gazebo: bool,
    pub realtime_config: RealtimeConfig,
}

impl Default for ServoParameters {
    fn default() -> Self {
        ServoParameters {
            move_group_name: "manipulator".to_string(),
            planning_frame: "base_link".to_string(),
            ee_frame_name: "ee_link".to_string(),
            robot_link_command_frame: "base_link".to_string(),
            publish_period: 0.034,
            command_in_type: CommandInType::Unitless,
            command_out_type: CommandOutType::JointTrajectory,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: false,
            scale: ScaleParameters::default(),
            lower_singularity_threshold: 17.,
            hard_stop_singularity_threshold: 30.,
            joint_limit_margin: 0.1,
            incoming_command_timeout: 0.1,
            num_outgoing_halt_msgs_to_publish: 4,
            halt_all_joints_in_joint_mode: true,
            halt_all_joints_in_cartesian_mode: true,
            low_latency_mode: false,
            smoothing_filter_plugin_name: "low_pass_filter".to_string(),
            low_pass_filter_cutoff_frequency: 5.,
            use_gazebo: false,
            realtime_config: RealtimeConfig::Ignore,
        }
    }
}

impl ServoParameters {
    /// Parses and validates parameters from a TOML document. Missing keys take their default
    /// value.
    ///
    /// # Errors
    /// * ParameterLoadException if the document cannot be parsed.
    /// * ConfigurationException if a value is invalid.
    pub fn from_toml_str(document: &str) -> ServoResult<Self> {
        let parameters: ServoParameters =
            toml::from_str(document).map_err(|e| ServoException::ParameterLoadException {
                message: e.to_string(),
            })?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Loads and validates parameters from a TOML file.
    ///
    /// # Errors
    /// * ParameterLoadException if the file cannot be read or parsed.
    /// * ConfigurationException if a value is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> ServoResult<Self> {
        let document =
            read_to_string(path.as_ref()).map_err(|e| ServoException::ParameterLoadException {
                message: format!("{}: {}", path.as_ref().display(), e),
            })?;
        ServoParameters::from_toml_str(&document)
    }

    /// Checks the parameters for consistency.
    ///
    /// # Errors
    /// * ConfigurationException naming the first invalid parameter.
    pub fn validate(&self) -> ServoResult<()> {
        if !is_positive_duration(self.publish_period) {
            return Err(create_configuration_exception(
                "publish_period must be positive",
            ));
        }
        if !(self.lower_singularity_threshold > 0.
            && self.hard_stop_singularity_threshold > self.lower_singularity_threshold
            && self.hard_stop_singularity_threshold.is_finite())
        {
            return Err(create_configuration_exception(
                "hard_stop_singularity_threshold must be greater than lower_singularity_threshold, which must be positive",
            ));
        }
        if !(self.joint_limit_margin >= 0. && self.joint_limit_margin.is_finite()) {
            return Err(create_configuration_exception(
                "joint_limit_margin must not be negative",
            ));
        }
        if !is_positive_duration(self.incoming_command_timeout) {
            return Err(create_configuration_exception(
                "incoming_command_timeout must be positive",
            ));
        }
        if !(self.scale.linear >= 0. && self.scale.rotational >= 0. && self.scale.joint >= 0.) {
            return Err(create_configuration_exception(
                "scale parameters must not be negative",
            ));
        }
        if self.command_out_type == CommandOutType::Float64MultiArray
            && !self.publish_joint_positions
            && !self.publish_joint_velocities
        {
            return Err(create_configuration_exception(
                "a Float64MultiArray output needs publish_joint_positions or publish_joint_velocities",
            ));
        }
        if !(self.low_pass_filter_cutoff_frequency > 0.
            && self.low_pass_filter_cutoff_frequency.is_finite())
        {
            return Err(create_configuration_exception(
                "low_pass_filter_cutoff_frequency must be positive",
            ));
        }
        if self.move_group_name.is_empty() || self.planning_frame.is_empty() {
            return Err(create_configuration_exception(
                "move_group_name and planning_frame must not be empty",
            ));
        }
        Ok(())
    }
}

/// Returns true if `seconds` is positive and representable as a [`Duration`].
fn is_positive_duration(seconds: f64) -> bool {
    seconds > 0. && Duration::try_from_secs_f64(seconds).is_ok()
}
