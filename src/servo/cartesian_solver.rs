// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Converts Cartesian twists into joint position deltas.
use crate::model::{JointModelGroup, KinematicState};
use crate::servo::command::{CommandRejection, ControlDimensionMask, DimensionMask, TwistCommand};
use crate::servo::frame_transforms::{planning_to_frame, FrameTransforms};
use crate::servo::parameters::{CommandInType, ServoParameters};
use crate::servo::singularity::{
    velocity_scaling_factor_for_singularity, JacobianSvd, SingularityScaling,
};
use crate::utils::remove_dimension;
use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3, Vector6};
use std::fmt;

/// Reason why no joint delta could be computed for a twist.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverFailure {
    InvalidCommand(CommandRejection),
    UnknownFrame(String),
    EmptyJacobian,
}

impl fmt::Display for SolverFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverFailure::InvalidCommand(rejection) => write!(f, "{}", rejection),
            SolverFailure::UnknownFrame(frame) => {
                write!(f, "Unknown frame '{}' in incoming command", frame)
            }
            SolverFailure::EmptyJacobian => write!(f, "The Jacobian of the group is empty"),
        }
    }
}

/// Joint delta for one cycle together with the singularity analysis it was scaled with.
#[derive(Debug, Clone)]
pub struct CartesianDelta {
    pub delta_theta: DVector<f64>,
    pub singularity: SingularityScaling,
}

/// Zeroes the components of `twist` which are not controlled.
pub fn enforce_control_dimensions(twist: &mut Vector6<f64>, control_dimensions: &DimensionMask) {
    for (dimension, value) in twist.iter_mut().enumerate() {
        if !control_dimensions.is_set(dimension) {
            *value = 0.;
        }
    }
}

/// Removes the rows of the drift dimensions from `jacobian` and `delta_x`.
///
/// Rows are removed from the highest index downwards so the remaining indices stay valid. At
/// least one row is always kept.
pub fn remove_drift_dimensions(
    jacobian: &mut DMatrix<f64>,
    delta_x: &mut DVector<f64>,
    drift_dimensions: &DimensionMask,
) {
    for dimension in (0..jacobian.nrows()).rev() {
        if drift_dimensions.is_set(dimension) && jacobian.nrows() > 1 {
            remove_dimension(jacobian, delta_x, dimension);
        }
    }
}

/// Converts a twist into a Cartesian position delta for one control period.
pub fn scale_cartesian_command(twist: &Vector6<f64>, parameters: &ServoParameters) -> DVector<f64> {
    let period = parameters.publish_period;
    let mut result = DVector::zeros(6);
    match parameters.command_in_type {
        CommandInType::Unitless => {
            for i in 0..3 {
                result[i] = parameters.scale.linear * period * twist[i];
                result[i + 3] = parameters.scale.rotational * period * twist[i + 3];
            }
        }
        CommandInType::SpeedUnits => {
            for i in 0..6 {
                result[i] = twist[i] * period;
            }
        }
    }
    result
}

fn rotate_twist(rotation: &UnitQuaternion<f64>, twist: &Vector6<f64>) -> Vector6<f64> {
    let linear = rotation * Vector3::new(twist[0], twist[1], twist[2]);
    let angular = rotation * Vector3::new(twist[3], twist[4], twist[5]);
    Vector6::new(
        linear[0], linear[1], linear[2], angular[0], angular[1], angular[2],
    )
}

/// Expresses `twist` in the planning frame.
///
/// Twists in the command frame (or without frame) and in the end-effector frame use the cached
/// `transforms`. Any other frame is looked up in `state`.
pub fn twist_in_planning_frame<S: KinematicState>(
    twist: &Vector6<f64>,
    frame_id: &str,
    state: &S,
    transforms: &FrameTransforms,
    command_frame: &str,
    parameters: &ServoParameters,
) -> Result<Vector6<f64>, SolverFailure> {
    if frame_id == parameters.planning_frame {
        return Ok(*twist);
    }
    let rotation = if frame_id.is_empty() || frame_id == command_frame {
        transforms.command_frame.rotation
    } else if frame_id == parameters.ee_frame_name {
        transforms.ee_frame.rotation
    } else {
        planning_to_frame(state, &parameters.planning_frame, frame_id)
            .ok_or_else(|| SolverFailure::UnknownFrame(frame_id.to_string()))?
            .rotation
    };
    Ok(rotate_twist(&rotation, twist))
}

/// Computes the joint delta which realizes `twist` (already in the planning frame) during one
/// control period.
pub fn joint_delta_for_twist<S: KinematicState>(
    twist: &Vector6<f64>,
    state: &S,
    group: &JointModelGroup,
    masks: &ControlDimensionMask,
    parameters: &ServoParameters,
) -> Result<CartesianDelta, SolverFailure> {
    let mut delta_x = scale_cartesian_command(twist, parameters);
    let mut jacobian = state.jacobian(group);
    remove_drift_dimensions(&mut jacobian, &mut delta_x, &masks.drift_dimensions);
    let svd = JacobianSvd::new(jacobian).ok_or(SolverFailure::EmptyJacobian)?;
    let mut delta_theta = &svd.pseudo_inverse * &delta_x;
    let singularity = velocity_scaling_factor_for_singularity(
        state,
        group,
        &masks.drift_dimensions,
        &delta_x,
        &svd,
        parameters.lower_singularity_threshold,
        parameters.hard_stop_singularity_threshold,
    );
    delta_theta *= singularity.scale;
    Ok(CartesianDelta {
        delta_theta,
        singularity,
    })
}

/// Runs the whole Cartesian pipeline for one command: validation, control dimensions, frame
/// change and the pseudo-inverse solution.
pub fn solve_twist<S: KinematicState>(
    command: &TwistCommand,
    state: &S,
    group: &JointModelGroup,
    transforms: &FrameTransforms,
    command_frame: &str,
    masks: &ControlDimensionMask,
    parameters: &ServoParameters,
) -> Result<CartesianDelta, SolverFailure> {
    command
        .check_valid(parameters.command_in_type)
        .map_err(SolverFailure::InvalidCommand)?;
    let mut twist = command.twist;
    enforce_control_dimensions(&mut twist, &masks.control_dimensions);
    let twist = twist_in_planning_frame(
        &twist,
        &command.frame_id,
        state,
        transforms,
        command_frame,
        parameters,
    )?;
    joint_delta_for_twist(&twist, state, group, masks, parameters)
}
