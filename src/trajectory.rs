// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains timed joint trajectories and their jerk-limited smoothing.

pub mod jerk_limited;
pub mod robot_trajectory;
pub mod smoothing;

pub use jerk_limited::{JerkLimitedGenerator, StepInput, StepOutput, StepResult};
pub use robot_trajectory::{RobotTrajectory, Waypoint};
pub use smoothing::{apply_smoothing, remove_identical_waypoints};
