// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the messages which are published by the servo and the publishers which deliver them.
use crate::servo::joint_state::JointState;
use crate::servo::parameters::{CommandOutType, ServoParameters};
use crate::servo::status::StatusCode;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of points of the outgoing trajectory if `use_gazebo` is set.
pub static GAZEBO_REDUNDANT_MESSAGE_COUNT: usize = 30;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointTrajectoryPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
    pub time_from_start: Duration,
}

/// A joint trajectory command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointTrajectory {
    /// Start time of the trajectory. None means "begin immediately".
    pub stamp: Option<Instant>,
    pub frame_id: String,
    pub joint_names: Vec<String>,
    pub points: Vec<JointTrajectoryPoint>,
}

/// A command in the shape selected by [`CommandOutType`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingCommand {
    Trajectory(JointTrajectory),
    /// Either positions or velocities of all joints.
    MultiArray(Vec<f64>),
}

/// Receives everything the servo publishes.
///
/// Publishers are called from the servo thread and must not block.
pub trait ServoPublisher: Send {
    fn publish_command(&mut self, command: OutgoingCommand);
    /// Called once per cycle with the status of the previous cycle.
    fn publish_status(&mut self, status: StatusCode);
    /// Called with the Jacobian condition number of every Cartesian cycle.
    fn publish_condition(&mut self, condition: f64);
}

/// Publishes into bounded channels. Messages are dropped if a channel is full.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    commands: Sender<OutgoingCommand>,
    status: Sender<StatusCode>,
    condition: Sender<f64>,
}

/// Receiving ends of a [`ChannelPublisher`].
#[derive(Debug, Clone)]
pub struct ServoOutputs {
    pub commands: Receiver<OutgoingCommand>,
    pub status: Receiver<StatusCode>,
    pub condition: Receiver<f64>,
}

impl ChannelPublisher {
    /// Creates a publisher whose channels hold up to `capacity` messages each.
    pub fn new(capacity: usize) -> (Self, ServoOutputs) {
        let (command_sender, command_receiver) = bounded(capacity);
        let (status_sender, status_receiver) = bounded(capacity);
        let (condition_sender, condition_receiver) = bounded(capacity);
        (
            ChannelPublisher {
                commands: command_sender,
                status: status_sender,
                condition: condition_sender,
            },
            ServoOutputs {
                commands: command_receiver,
                status: status_receiver,
                condition: condition_receiver,
            },
        )
    }
}

fn try_publish<T>(sender: &Sender<T>, message: T, channel: &str) {
    match sender.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!("{} channel is full, dropping message", channel),
        Err(TrySendError::Disconnected(_)) => {
            debug!("{} channel is disconnected, dropping message", channel)
        }
    }
}

impl ServoPublisher for ChannelPublisher {
    fn publish_command(&mut self, command: OutgoingCommand) {
        try_publish(&self.commands, command, "command");
    }

    fn publish_status(&mut self, status: StatusCode) {
        try_publish(&self.status, status, "status");
    }

    fn publish_condition(&mut self, condition: f64) {
        try_publish(&self.condition, condition, "condition");
    }
}

/// Builds a single-point trajectory from `state`, filling only the enabled fields.
///
/// Accelerations are sent as zeros, some controllers only require them to be present.
pub fn compose_joint_trajectory(state: &JointState, parameters: &ServoParameters) -> JointTrajectory {
    let mut point = JointTrajectoryPoint {
        time_from_start: Duration::from_secs_f64(parameters.publish_period),
        ..Default::default()
    };
    if parameters.publish_joint_positions {
        point.positions = state.positions.as_slice().to_vec();
    }
    if parameters.publish_joint_velocities {
        point.velocities = state.velocities.as_slice().to_vec();
    }
    if parameters.publish_joint_accelerations {
        point.accelerations = vec![0.; state.len()];
    }
    JointTrajectory {
        stamp: None,
        frame_id: parameters.planning_frame.clone(),
        joint_names: state.names.clone(),
        points: vec![point],
    }
}

/// The command which is repeated before the first computed command, holding `state`.
pub fn initial_command(state: &JointState, parameters: &ServoParameters) -> JointTrajectory {
    let mut trajectory = compose_joint_trajectory(state, parameters);
    trajectory.stamp = Some(Instant::now());
    for point in trajectory.points.iter_mut() {
        point.velocities.iter_mut().for_each(|v| *v = 0.);
    }
    trajectory
}

/// Repeats the first point until the trajectory has `count` points, the i-th point at
/// `(i + 1) * period`.
pub fn insert_redundant_points(trajectory: &mut JointTrajectory, count: usize, period: f64) {
    if count < 2 {
        return;
    }
    let first = match trajectory.points.first() {
        Some(point) => point.clone(),
        None => return,
    };
    trajectory.points = (0..count)
        .map(|i| JointTrajectoryPoint {
            time_from_start: Duration::from_secs_f64((i + 1) as f64 * period),
            ..first.clone()
        })
        .collect();
}

/// Converts `trajectory` into the configured output shape. Disabled fields are cleared first.
pub fn to_outgoing_command(
    trajectory: &mut JointTrajectory,
    parameters: &ServoParameters,
) -> OutgoingCommand {
    if let Some(point) = trajectory.points.first_mut() {
        if !parameters.publish_joint_positions {
            point.positions.clear();
        }
        if !parameters.publish_joint_velocities {
            point.velocities.clear();
        }
        if !parameters.publish_joint_accelerations {
            point.accelerations.clear();
        }
    }
    match parameters.command_out_type {
        CommandOutType::JointTrajectory => {
            trajectory.stamp = None;
            OutgoingCommand::Trajectory(trajectory.clone())
        }
        CommandOutType::Float64MultiArray => {
            let data = match trajectory.points.first() {
                Some(point) if parameters.publish_joint_positions => point.positions.clone(),
                Some(point) if parameters.publish_joint_velocities => point.velocities.clone(),
                _ => Vec::new(),
            };
            OutgoingCommand::MultiArray(data)
        }
    }
}
