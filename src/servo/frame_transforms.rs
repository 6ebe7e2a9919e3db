// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the transforms from the planning frame to the command and end-effector frames.
use crate::model::KinematicState;
use nalgebra::Isometry3;

/// Pose of `frame` expressed in `planning_frame`.
///
/// Computed as `inverse(T_base_planning) * T_base_frame`. Returns None if either frame is unknown
/// to the kinematic model.
pub fn planning_to_frame<S: KinematicState>(
    state: &S,
    planning_frame: &str,
    frame: &str,
) -> Option<Isometry3<f64>> {
    let base_to_planning = state.global_link_transform(planning_frame)?;
    let base_to_frame = state.global_link_transform(frame)?;
    Some(base_to_planning.inverse() * base_to_frame)
}

/// The two transforms which are refreshed every cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameTransforms {
    /// Planning frame to command frame.
    pub command_frame: Isometry3<f64>,
    /// Planning frame to end-effector frame.
    pub ee_frame: Isometry3<f64>,
}

impl FrameTransforms {
    pub fn compute<S: KinematicState>(
        state: &S,
        planning_frame: &str,
        command_frame: &str,
        ee_frame: &str,
    ) -> Option<Self> {
        Some(FrameTransforms {
            command_frame: planning_to_frame(state, planning_frame, command_frame)?,
            ee_frame: planning_to_frame(state, planning_frame, ee_frame)?,
        })
    }
}
