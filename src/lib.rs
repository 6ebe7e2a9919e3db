// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # servo-rs
//! servo-rs converts streams of Cartesian twists and joint jog commands into smooth joint
//! commands for a robot arm, and smooths planned joint trajectories so that they respect
//! velocity, acceleration and jerk limits.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE SERVOING A REAL ROBOT!**
//!
//! ## Design
//! The library is divided into the following modules:
//! * [model](`crate::model`) - the kinematic interface the servo queries. Implement
//!   [`KinematicState`] and [`StateMonitor`] for your robot or use the included
//!   [`PlanarArmState`] for testing.
//! * [servo](`crate::servo`) - the [`Servo`], which runs the servo cycle on its own thread.
//! * [trajectory](`crate::trajectory`) - the [`RobotTrajectory`] and its jerk-limited smoothing
//!   with [`apply_smoothing`].
//!
//! # Example:
//!```no_run
//! use servo::{ChannelPublisher, OutgoingCommand, PlanarArmMonitor, PlanarArmState, Servo,
//!             ServoParameters, ServoResult, TwistCommand};
//! use std::sync::Arc;
//! use std::time::Duration;
//! fn main() -> ServoResult<()> {
//!     let arm = PlanarArmState::new(&[0.5, 0.4, 0.3], Default::default())
//!         .with_positions(&[0.3, 0.8, 0.6]);
//!     let monitor = Arc::new(PlanarArmMonitor::new(arm));
//!     let parameters = ServoParameters::load("servo.toml")?;
//!     let (publisher, outputs) = ChannelPublisher::new(100);
//!     let mut servo = Servo::new(parameters, monitor.clone(), Box::new(publisher))?;
//!     servo.start()?;
//!     for _ in 0..100 {
//!         servo.twist_command(TwistCommand::new("base_link", [0.05, 0., 0.], [0., 0., 0.]));
//!         if let Ok(OutgoingCommand::Trajectory(trajectory)) =
//!             outputs.commands.recv_timeout(Duration::from_millis(100))
//!         {
//!             let positions = trajectory.points[0].positions.clone();
//!             monitor.update(|state| state.set_positions(&positions));
//!         }
//!     }
//!     servo.stop()
//! }
//! ```
//!
//! A servo is driven by the commands it receives. As long as no command arrived it only
//! publishes its status. Commands older than the incoming command timeout are considered
//! stale and the robot is brought to a halt.
//!
//! Planned trajectories are smoothed like this:
//!```no_run
//! use servo::{apply_smoothing, JointModel, JointModelGroup, JointType, RobotTrajectory,
//!             ServoResult, VariableBounds, Waypoint};
//! fn main() -> ServoResult<()> {
//!     let bounds = VariableBounds {
//!         position: Some((-3., 3.)),
//!         max_velocity: Some(2.),
//!         max_acceleration: Some(5.),
//!     };
//!     let group = JointModelGroup::new(
//!         "arm",
//!         vec![JointModel::new("joint1", JointType::Revolute, bounds)],
//!     );
//!     let mut trajectory = RobotTrajectory::new(group);
//!     trajectory.add_suffix_waypoint(Waypoint::new(&[0.]), 0.);
//!     trajectory.add_suffix_waypoint(Waypoint::new(&[1.]), 1.);
//!     apply_smoothing(&mut trajectory, 1., 1.)
//! }
//! ```
//! The smoothed trajectory has one waypoint per millisecond and ends at rest at the last
//! waypoint. If smoothing fails the trajectory is left untouched.
pub mod exception;
pub mod model;
pub mod servo;
pub mod trajectory;
pub mod utils;

pub use exception::{ServoException, ServoResult};
pub use model::planar_arm::{PlanarArmMonitor, PlanarArmState};
pub use model::{
    JointModel, JointModelGroup, JointType, KinematicState, StateMonitor, VariableBounds,
};
pub use servo::*;
pub use trajectory::{apply_smoothing, RobotTrajectory, Waypoint};
