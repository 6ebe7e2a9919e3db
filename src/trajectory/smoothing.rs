// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the jerk-limited smoothing of a [`RobotTrajectory`].
//!
//! The trajectory is unwound and cleaned from duplicate waypoints. Then every waypoint is
//! approached with the [`JerkLimitedGenerator`], one timestep at a time. A step after which a
//! joint moves slower than its target velocity is lagging behind the trajectory. Such a step is
//! discarded and the target velocities are reduced until the motion keeps up.
use crate::exception::{create_smoothing_exception, ServoResult};
use crate::model::JointModelGroup;
use crate::trajectory::jerk_limited::{JerkLimitedGenerator, StepInput, StepOutput, StepResult};
use crate::trajectory::robot_trajectory::{RobotTrajectory, Waypoint};
use tracing::{debug, error};

/// Velocity limit of joints without velocity bound in \[rad/s\].
pub static DEFAULT_MAX_VELOCITY: f64 = 5.;
/// Acceleration limit of joints without acceleration bound in \[rad/s²\].
pub static DEFAULT_MAX_ACCELERATION: f64 = 10.;
/// Jerk limit of all joints in \[rad/s³\].
pub static DEFAULT_MAX_JERK: f64 = 20.;
/// Waypoints closer than this to their predecessor are dropped.
pub static IDENTICAL_POSITION_EPSILON: f64 = 1e-3;
/// The search for a feasible target velocity stops below this magnitude in \[rad/s\].
pub static MINIMUM_VELOCITY_SEARCH_MAGNITUDE: f64 = 0.01;
/// Timestep of the generator and duration between the output waypoints in \[s\].
pub static DEFAULT_TIMESTEP: f64 = 0.001;
/// Factor applied to the target velocities after a lagging step.
pub static TARGET_VELOCITY_DAMPING: f64 = 0.9;
/// Upper bound for the generator calls needed to reach one waypoint.
static MAX_STEPS_PER_WAYPOINT: usize = 2_000_000;

/// Returns true if the two waypoints are closer than [`IDENTICAL_POSITION_EPSILON`].
pub fn is_identical_waypoint(previous: &Waypoint, next: &Waypoint, group: &JointModelGroup) -> bool {
    group.distance(&previous.positions, &next.positions) <= IDENTICAL_POSITION_EPSILON
}

/// Drops waypoints which are identical to the last kept one.
///
/// The first waypoint is always kept with a duration of zero. The duration of a dropped waypoint
/// is added to the next kept one, or to the last kept one at the end of the trajectory.
pub fn remove_identical_waypoints(trajectory: &RobotTrajectory) -> RobotTrajectory {
    let group = match trajectory.group() {
        Some(group) => group,
        None => return trajectory.clone(),
    };
    let mut result = RobotTrajectory::new(group.clone());
    let mut pending_duration = 0.;
    for (index, waypoint) in trajectory.waypoints().iter().enumerate() {
        let duration = trajectory.duration_from_previous(index).unwrap_or(0.);
        let keep = match result.last_waypoint() {
            None => {
                result.add_suffix_waypoint(waypoint.clone(), 0.);
                continue;
            }
            Some(last) => !is_identical_waypoint(last, waypoint, group),
        };
        if keep {
            result.add_suffix_waypoint(waypoint.clone(), duration + pending_duration);
            pending_duration = 0.;
        } else {
            pending_duration += duration;
        }
    }
    if pending_duration > 0. && result.waypoint_count() > 1 {
        let last = result.waypoint_count() - 1;
        let duration = result.duration_from_previous(last).unwrap_or(0.) + pending_duration;
        result.set_duration_from_previous(last, duration);
    }
    result
}

/// Limits of the generator for every joint of `group`.
fn kinematic_limits(
    group: &JointModelGroup,
    max_velocity_scaling_factor: f64,
    max_acceleration_scaling_factor: f64,
    input: &mut StepInput,
) {
    for (i, joint) in group.joints.iter().enumerate() {
        input.max_velocity[i] = max_velocity_scaling_factor
            * joint.bounds.max_velocity.unwrap_or(DEFAULT_MAX_VELOCITY);
        input.max_acceleration[i] = max_acceleration_scaling_factor
            * joint
                .bounds
                .max_acceleration
                .unwrap_or(DEFAULT_MAX_ACCELERATION);
        input.max_jerk[i] = DEFAULT_MAX_JERK;
    }
}

fn set_current_state(input: &mut StepInput, waypoint: &Waypoint) {
    for i in 0..input.num_dof() {
        input.current_position[i] = waypoint.positions[i];
        input.current_velocity[i] = waypoint.velocity(i);
        input.current_acceleration[i] = waypoint.acceleration(i);
    }
}

fn set_target_state(input: &mut StepInput, waypoint: &Waypoint) {
    for i in 0..input.num_dof() {
        input.target_position[i] = waypoint.positions[i];
        input.target_velocity[i] = waypoint.velocity(i);
        input.target_acceleration[i] = waypoint.acceleration(i);
    }
}

/// Returns true if a joint moves slower than its target velocity.
///
/// Joints with a target velocity of zero never lag.
pub fn is_lagging(input: &StepInput, output: &StepOutput) -> bool {
    input
        .target_velocity
        .iter()
        .zip(output.new_velocity.iter())
        .any(|(target, new)| *target != 0. && new / target < 1.)
}

/// Damps the target velocities and derives target accelerations which lead there within one
/// timestep. Returns the magnitude of the new target velocity.
fn damp_target_velocity(input: &mut StepInput, timestep: f64) -> f64 {
    for i in 0..input.num_dof() {
        input.target_velocity[i] *= TARGET_VELOCITY_DAMPING;
        let max_acceleration = input.max_acceleration[i];
        input.target_acceleration[i] = ((input.target_velocity[i] - input.current_velocity[i])
            / timestep)
            .clamp(-max_acceleration, max_acceleration);
    }
    input
        .target_velocity
        .iter()
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt()
}

fn waypoint_from_output(output: &StepOutput) -> Waypoint {
    Waypoint {
        positions: output.new_position.clone(),
        velocities: output.new_velocity.clone(),
        accelerations: output.new_acceleration.clone(),
    }
}

/// Smooths `trajectory` so that it respects the velocity, acceleration and jerk limits.
///
/// The result has one waypoint per [`DEFAULT_TIMESTEP`]. Its first waypoint is the first
/// waypoint of the input and the last one is at the position of the last input waypoint.
/// Continuous joints are unwound, so they may end a multiple of 2 PI away from that position.
/// `trajectory` is only replaced if smoothing succeeds.
///
/// # Arguments
/// * `max_velocity_scaling_factor` - Scales the velocity bounds of the joints.
/// * `max_acceleration_scaling_factor` - Scales the acceleration bounds of the joints.
/// # Errors
/// * SmoothingException if the trajectory has no group, has fewer than two distinct
///   waypoints, is too dense for the timestep or if a joint keeps lagging behind.
pub fn apply_smoothing(
    trajectory: &mut RobotTrajectory,
    max_velocity_scaling_factor: f64,
    max_acceleration_scaling_factor: f64,
) -> ServoResult<()> {
    let smoothed = smooth(
        trajectory,
        max_velocity_scaling_factor,
        max_acceleration_scaling_factor,
    )?;
    *trajectory = smoothed;
    Ok(())
}

fn smooth(
    trajectory: &RobotTrajectory,
    max_velocity_scaling_factor: f64,
    max_acceleration_scaling_factor: f64,
) -> ServoResult<RobotTrajectory> {
    let group = trajectory.group().ok_or_else(|| {
        create_smoothing_exception("The trajectory does not know the group it was planned for")
    })?;
    if trajectory.waypoint_count() < 2 {
        return Err(create_smoothing_exception(
            "Trajectory does not have enough points to smooth",
        ));
    }
    if !(max_velocity_scaling_factor > 0. && max_velocity_scaling_factor.is_finite())
        || !(max_acceleration_scaling_factor > 0. && max_acceleration_scaling_factor.is_finite())
    {
        return Err(create_smoothing_exception(
            "The scaling factors must be positive",
        ));
    }
    let num_dof = group.variable_count();
    if trajectory
        .waypoints()
        .iter()
        .any(|waypoint| waypoint.positions.len() != num_dof)
    {
        return Err(create_smoothing_exception(
            "The waypoints do not match the joint group",
        ));
    }

    let mut unwound = trajectory.clone();
    unwound.unwind();
    let input_trajectory = remove_identical_waypoints(&unwound);
    let num_waypoints = input_trajectory.waypoint_count();
    debug!("smoothing {} waypoints", num_waypoints);
    if num_waypoints < 2 {
        return Err(create_smoothing_exception(
            "Trajectory does not have enough distinct points to smooth",
        ));
    }
    if input_trajectory.average_segment_duration() < DEFAULT_TIMESTEP {
        return Err(create_smoothing_exception(
            "The timestep of the smoothing is not sufficiently short",
        ));
    }

    let mut generator = JerkLimitedGenerator::new(num_dof, DEFAULT_TIMESTEP);
    let mut input = StepInput::new(num_dof);
    let mut output = StepOutput::new(num_dof);
    kinematic_limits(
        group,
        max_velocity_scaling_factor,
        max_acceleration_scaling_factor,
        &mut input,
    );

    let waypoints = input_trajectory.waypoints();
    let mut smoothed = RobotTrajectory::new(group.clone());
    smoothed.add_suffix_waypoint(waypoints[0].clone(), 0.);
    set_current_state(&mut input, &waypoints[0]);

    for target in waypoints.iter().skip(1) {
        set_target_state(&mut input, target);
        let mut steps = 0;
        loop {
            steps += 1;
            if steps > MAX_STEPS_PER_WAYPOINT {
                return Err(create_smoothing_exception(
                    "The jerk-limited motion does not reach the waypoint",
                ));
            }
            let result = generator.update(&input, &mut output);
            if result == StepResult::Error {
                error!("The jerk-limited step failed for target {:?}", target.positions);
                return Err(create_smoothing_exception(
                    "The jerk-limited step failed",
                ));
            }
            if is_lagging(&input, &output) {
                let velocity_magnitude = damp_target_velocity(&mut input, DEFAULT_TIMESTEP);
                if velocity_magnitude < MINIMUM_VELOCITY_SEARCH_MAGNITUDE {
                    error!("Could not prevent backward motion");
                    return Err(create_smoothing_exception(
                        "Could not prevent backward motion",
                    ));
                }
                continue;
            }
            smoothed.add_suffix_waypoint(waypoint_from_output(&output), DEFAULT_TIMESTEP);
            output.pass_to_input(&mut input);
            if result == StepResult::Finished {
                break;
            }
        }
    }
    debug!(
        "smoothed trajectory has {} waypoints and lasts {} s",
        smoothed.waypoint_count(),
        smoothed.duration()
    );
    Ok(smoothed)
}
