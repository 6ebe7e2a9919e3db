// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! A serial arm whose revolute joints all rotate about the z-axis of its base.
//!
//! The arm is useful for simulation and testing: its kinematics are simple enough to check by
//! hand, yet it has real singularities (stretched or folded links).
use crate::model::{
    JointModel, JointModelGroup, JointType, KinematicState, StateMonitor, VariableBounds,
};
use nalgebra::{DMatrix, DVector, Isometry3, Vector3};
use std::sync::{Mutex, PoisonError};

/// Name of the joint group which contains all joints of the arm.
pub static PLANAR_ARM_GROUP: &str = "planar_arm";
/// Name of the frame the arm is mounted on.
pub static PLANAR_ARM_BASE_FRAME: &str = "base_link";
/// Name of the frame at the tip of the last link.
pub static PLANAR_ARM_EE_FRAME: &str = "ee_link";

/// State of a planar arm with one revolute joint per link.
#[derive(Debug, Clone)]
pub struct PlanarArmState {
    group: JointModelGroup,
    link_lengths: Vec<f64>,
    positions: DVector<f64>,
    velocities: DVector<f64>,
    base_pose: Isometry3<f64>,
}

impl PlanarArmState {
    /// Creates an arm in its zero configuration.
    ///
    /// # Arguments
    /// * `link_lengths` - Length of each link in \[m\]. One joint is created per link.
    /// * `bounds` - Limits which are applied to every joint.
    pub fn new(link_lengths: &[f64], bounds: VariableBounds) -> Self {
        let joints = (0..link_lengths.len())
            .map(|i| JointModel::new(&format!("joint{}", i + 1), JointType::Revolute, bounds))
            .collect();
        PlanarArmState {
            group: JointModelGroup::new(PLANAR_ARM_GROUP, joints),
            link_lengths: link_lengths.to_vec(),
            positions: DVector::zeros(link_lengths.len()),
            velocities: DVector::zeros(link_lengths.len()),
            base_pose: Isometry3::identity(),
        }
    }

    /// Mounts the arm at `base_pose` relative to the `world` frame.
    pub fn with_base_pose(mut self, base_pose: Isometry3<f64>) -> Self {
        self.base_pose = base_pose;
        self
    }

    pub fn with_positions(mut self, positions: &[f64]) -> Self {
        self.positions = DVector::from_column_slice(positions);
        self
    }

    pub fn group(&self) -> &JointModelGroup {
        &self.group
    }

    pub fn positions(&self) -> &DVector<f64> {
        &self.positions
    }

    pub fn set_positions(&mut self, positions: &[f64]) {
        self.positions = DVector::from_column_slice(positions);
    }

    pub fn set_velocities(&mut self, velocities: &[f64]) {
        self.velocities = DVector::from_column_slice(velocities);
    }

    /// name of the frame attached to link `index` (zero based)
    pub fn link_name(index: usize) -> String {
        format!("link{}", index + 1)
    }

    /// Poses of all joint frames followed by the pose of the tip.
    fn frame_poses(&self) -> Vec<Isometry3<f64>> {
        let mut pose = self.base_pose;
        let mut frames = Vec::with_capacity(self.link_lengths.len() + 1);
        for (q, length) in self.positions.iter().zip(self.link_lengths.iter()) {
            pose *= Isometry3::rotation(Vector3::z() * *q);
            frames.push(pose);
            pose *= Isometry3::translation(*length, 0., 0.);
        }
        frames.push(pose);
        frames
    }
}

impl KinematicState for PlanarArmState {
    fn joint_model_group(&self, group: &str) -> Option<JointModelGroup> {
        if group == self.group.name {
            Some(self.group.clone())
        } else {
            None
        }
    }

    fn joint_group_positions(&self, _group: &JointModelGroup) -> DVector<f64> {
        self.positions.clone()
    }

    fn joint_group_velocities(&self, _group: &JointModelGroup) -> DVector<f64> {
        self.velocities.clone()
    }

    fn set_joint_group_positions(&mut self, _group: &JointModelGroup, positions: &DVector<f64>) {
        self.positions = positions.clone();
    }

    fn jacobian(&self, _group: &JointModelGroup) -> DMatrix<f64> {
        let frames = self.frame_poses();
        let num_joints = self.link_lengths.len();
        let tip = frames[num_joints].translation.vector;
        let mut jacobian = DMatrix::zeros(6, num_joints);
        for (i, frame) in frames.iter().take(num_joints).enumerate() {
            let axis = frame.rotation * Vector3::z();
            let linear = axis.cross(&(tip - frame.translation.vector));
            jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
            jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&axis);
        }
        jacobian
    }

    fn global_link_transform(&self, frame: &str) -> Option<Isometry3<f64>> {
        if frame == "world" {
            return Some(Isometry3::identity());
        }
        if frame == PLANAR_ARM_BASE_FRAME {
            return Some(self.base_pose);
        }
        let frames = self.frame_poses();
        if frame == PLANAR_ARM_EE_FRAME {
            return frames.last().copied();
        }
        (0..self.link_lengths.len())
            .find(|&i| PlanarArmState::link_name(i) == frame)
            .map(|i| frames[i])
    }
}

/// Shares a [`PlanarArmState`] between the servo and a simulation.
#[derive(Debug)]
pub struct PlanarArmMonitor {
    state: Mutex<PlanarArmState>,
}

impl PlanarArmMonitor {
    pub fn new(state: PlanarArmState) -> Self {
        PlanarArmMonitor {
            state: Mutex::new(state),
        }
    }

    /// Applies `update` to the shared state.
    pub fn update<F: FnOnce(&mut PlanarArmState)>(&self, update: F) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut state);
    }
}

impl StateMonitor for PlanarArmMonitor {
    type State = PlanarArmState;

    fn current_state(&self) -> PlanarArmState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
