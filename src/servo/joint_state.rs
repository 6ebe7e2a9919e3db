// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use crate::model::{JointModelGroup, KinematicState};
use nalgebra::DVector;

/// Positions and velocities of the active joints of a group, index-aligned with `names`.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    pub names: Vec<String>,
    pub positions: DVector<f64>,
    pub velocities: DVector<f64>,
}

impl JointState {
    /// Creates a state with all positions and velocities zero.
    pub fn zeros(group: &JointModelGroup) -> Self {
        JointState {
            names: group.active_joint_names(),
            positions: DVector::zeros(group.variable_count()),
            velocities: DVector::zeros(group.variable_count()),
        }
    }

    /// Copies the joint values of `group` from `state`.
    pub fn from_kinematic_state<S: KinematicState>(state: &S, group: &JointModelGroup) -> Self {
        JointState {
            names: group.active_joint_names(),
            positions: state.joint_group_positions(group),
            velocities: state.joint_group_velocities(group),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
