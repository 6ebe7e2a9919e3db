// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the kinematic model types.
//!
//! The servo does not compute kinematics itself. It queries a [`KinematicState`], a read-only
//! snapshot of the robot which knows its joint group, Jacobian and link transforms. A
//! [`StateMonitor`] hands out such snapshots and is shared between the servo thread and the
//! rest of the application.
use nalgebra::{DMatrix, DVector, Isometry3};
use std::f64::consts::PI;
use std::fmt;

pub mod planar_arm;

/// Kind of a single-variable joint.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum JointType {
    /// Revolute joint with position limits.
    Revolute,
    /// Revolute joint without position limits. Positions of such joints wrap around.
    Continuous,
    /// Linear joint.
    Prismatic,
}

/// Limits of a joint variable.
///
/// Limits which are not defined for a joint are `None`.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct VariableBounds {
    /// Lower and upper position limit.
    pub position: Option<(f64, f64)>,
    /// Symmetric velocity limit.
    pub max_velocity: Option<f64>,
    /// Symmetric acceleration limit.
    pub max_acceleration: Option<f64>,
}

impl VariableBounds {
    /// Checks whether a position is inside the position limits.
    ///
    /// A positive `margin` widens the allowed range, a negative one shrinks it. Joints without
    /// position limits always satisfy their bounds.
    pub fn satisfies_position_bounds(&self, position: f64, margin: f64) -> bool {
        match self.position {
            Some((min, max)) => position >= min - margin && position <= max + margin,
            None => true,
        }
    }
}

/// Describes one joint of a [`JointModelGroup`].
#[derive(Debug, Clone, PartialEq)]
pub struct JointModel {
    pub name: String,
    pub joint_type: JointType,
    pub bounds: VariableBounds,
}

impl JointModel {
    pub fn new(name: &str, joint_type: JointType, bounds: VariableBounds) -> Self {
        JointModel {
            name: name.to_string(),
            joint_type,
            bounds,
        }
    }

    /// Distance between two positions of this joint. Continuous joints take the shorter way
    /// around the circle.
    pub fn distance(&self, from: f64, to: f64) -> f64 {
        match self.joint_type {
            JointType::Continuous => shortest_angular_distance(from, to).abs(),
            _ => (to - from).abs(),
        }
    }
}

/// An ordered set of active joints which are controlled together.
#[derive(Debug, Clone, PartialEq)]
pub struct JointModelGroup {
    pub name: String,
    pub joints: Vec<JointModel>,
}

impl JointModelGroup {
    pub fn new(name: &str, joints: Vec<JointModel>) -> Self {
        JointModelGroup {
            name: name.to_string(),
            joints,
        }
    }
    /// number of joint variables in the group
    pub fn variable_count(&self) -> usize {
        self.joints.len()
    }
    pub fn active_joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|joint| joint.name.clone()).collect()
    }
    pub fn joint(&self, name: &str) -> Option<&JointModel> {
        self.joints.iter().find(|joint| joint.name == name)
    }
    /// Sum of the per-joint distances between two group configurations.
    pub fn distance(&self, from: &[f64], to: &[f64]) -> f64 {
        self.joints
            .iter()
            .zip(from.iter().zip(to.iter()))
            .map(|(joint, (&a, &b))| joint.distance(a, b))
            .sum()
    }
}

impl fmt::Display for JointModelGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.active_joint_names().join(", "))
    }
}

/// A snapshot of the robot configuration which answers kinematic queries.
///
/// Snapshots are cheap to clone. The servo perturbs a private clone when it needs to look
/// ahead, the snapshot it was given is never modified.
pub trait KinematicState: Clone + Send + 'static {
    /// Returns the joint group with the given name or None if it is unknown.
    fn joint_model_group(&self, group: &str) -> Option<JointModelGroup>;
    /// Joint positions of the group, ordered like [`JointModelGroup::joints`].
    fn joint_group_positions(&self, group: &JointModelGroup) -> DVector<f64>;
    /// Joint velocities of the group, ordered like [`JointModelGroup::joints`].
    fn joint_group_velocities(&self, group: &JointModelGroup) -> DVector<f64>;
    fn set_joint_group_positions(&mut self, group: &JointModelGroup, positions: &DVector<f64>);
    /// 6xN Jacobian of the group tip expressed in the model base frame. The first three rows
    /// are linear, the last three angular.
    fn jacobian(&self, group: &JointModelGroup) -> DMatrix<f64>;
    /// Pose of a link in the model base frame or None if the frame is unknown.
    fn global_link_transform(&self, frame: &str) -> Option<Isometry3<f64>>;
}

/// Provides the latest state of the robot.
pub trait StateMonitor: Send + Sync + 'static {
    type State: KinematicState;
    /// Returns a copy of the current robot state.
    fn current_state(&self) -> Self::State;
}

/// Signed shortest angular distance from `from` to `to` in (-PI, PI].
pub fn shortest_angular_distance(from: f64, to: f64) -> f64 {
    let difference = (to - from).rem_euclid(2. * PI);
    if difference > PI {
        difference - 2. * PI
    } else {
        difference
    }
}
