// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the velocity commands which are streamed into the servo.
use crate::servo::parameters::CommandInType;
use crate::utils::{contains_nan, is_nonzero};
use nalgebra::Vector6;
use std::fmt;
use std::time::Instant;

/// A Cartesian velocity command. The first three components are linear, the last three angular.
#[derive(Debug, Clone, PartialEq)]
pub struct TwistCommand {
    pub twist: Vector6<f64>,
    /// Frame in which the twist is expressed. An empty frame means the current command frame.
    pub frame_id: String,
    /// Time of creation. A command without stamp was never set.
    pub stamp: Option<Instant>,
}

impl TwistCommand {
    /// Creates a twist command stamped with the current time.
    pub fn new(frame_id: &str, linear: [f64; 3], angular: [f64; 3]) -> Self {
        TwistCommand {
            twist: Vector6::new(
                linear[0], linear[1], linear[2], angular[0], angular[1], angular[2],
            ),
            frame_id: frame_id.to_string(),
            stamp: Some(Instant::now()),
        }
    }

    pub fn is_nonzero(&self) -> bool {
        is_nonzero(self.twist.as_slice())
    }

    /// Checks the command for NaN and, for unitless input, components outside of \[-1, 1\].
    pub fn check_valid(&self, command_in_type: CommandInType) -> Result<(), CommandRejection> {
        check_components(self.twist.as_slice(), command_in_type)
    }
}

impl Default for TwistCommand {
    fn default() -> Self {
        TwistCommand {
            twist: Vector6::zeros(),
            frame_id: String::new(),
            stamp: None,
        }
    }
}

/// Velocities for individual joints, addressed by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointJogCommand {
    pub joint_names: Vec<String>,
    pub velocities: Vec<f64>,
    pub stamp: Option<Instant>,
}

impl JointJogCommand {
    /// Creates a jog command stamped with the current time.
    pub fn new(joint_names: &[&str], velocities: &[f64]) -> Self {
        JointJogCommand {
            joint_names: joint_names.iter().map(|name| name.to_string()).collect(),
            velocities: velocities.to_vec(),
            stamp: Some(Instant::now()),
        }
    }

    pub fn is_nonzero(&self) -> bool {
        is_nonzero(&self.velocities)
    }

    /// Checks the command for NaN and, for unitless input, velocities outside of \[-1, 1\].
    pub fn check_valid(&self, command_in_type: CommandInType) -> Result<(), CommandRejection> {
        check_components(&self.velocities, command_in_type)
    }
}

/// Either kind of velocity command.
#[derive(Debug, Clone, PartialEq)]
pub enum VelocityCommand {
    Twist(TwistCommand),
    JointJog(JointJogCommand),
}

impl From<TwistCommand> for VelocityCommand {
    fn from(command: TwistCommand) -> Self {
        VelocityCommand::Twist(command)
    }
}

impl From<JointJogCommand> for VelocityCommand {
    fn from(command: JointJogCommand) -> Self {
        VelocityCommand::JointJog(command)
    }
}

/// Reason why a command was not executed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CommandRejection {
    ContainsNan,
    OutOfRange,
}

impl fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandRejection::ContainsNan => {
                write!(f, "nan in incoming command. Skipping this datapoint.")
            }
            CommandRejection::OutOfRange => write!(
                f,
                "Component of incoming command is >1. Skipping this datapoint."
            ),
        }
    }
}

fn check_components(values: &[f64], command_in_type: CommandInType) -> Result<(), CommandRejection> {
    if contains_nan(values) {
        return Err(CommandRejection::ContainsNan);
    }
    if command_in_type == CommandInType::Unitless && values.iter().any(|x| x.abs() > 1.) {
        return Err(CommandRejection::OutOfRange);
    }
    Ok(())
}

/// Selects a subset of the six Cartesian dimensions
/// (x, y, z translation followed by x, y, z rotation).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DimensionMask(pub [bool; 6]);

impl DimensionMask {
    pub fn all() -> Self {
        DimensionMask([true; 6])
    }
    pub fn none() -> Self {
        DimensionMask([false; 6])
    }
    pub fn is_set(&self, dimension: usize) -> bool {
        self.0.get(dimension).copied().unwrap_or(false)
    }
}

/// The two masks which shape how Cartesian commands are executed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ControlDimensionMask {
    /// Dimensions of incoming twists which are executed. Others are zeroed.
    pub control_dimensions: DimensionMask,
    /// Dimensions which are left unconstrained when solving for joint motion.
    pub drift_dimensions: DimensionMask,
}

impl Default for ControlDimensionMask {
    fn default() -> Self {
        ControlDimensionMask {
            control_dimensions: DimensionMask::all(),
            drift_dimensions: DimensionMask::none(),
        }
    }
}
