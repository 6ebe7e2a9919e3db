// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the streaming velocity servo.
//!
//! A [`Servo`] converts Cartesian twists and joint jogs into a stream of joint commands, one
//! per period. Every cycle the latest command is solved into a joint delta, slowed down near
//! singularities and obstacles, checked against the joint limits, smoothed and published.

pub mod cartesian_solver;
pub mod command;
mod control_loop;
mod control_tools;
pub mod enforce_limits;
pub mod frame_transforms;
pub mod ingress;
pub mod joint_solver;
pub mod joint_state;
pub mod low_pass_filter;
pub mod output;
pub mod parameters;
pub mod servo_calcs;
pub mod singularity;
pub mod status;

pub use command::{
    CommandRejection, ControlDimensionMask, DimensionMask, JointJogCommand, TwistCommand,
    VelocityCommand,
};
pub use control_loop::{ParameterUpdate, Servo, ServoState};
pub use control_tools::has_realtime_kernel;
pub use low_pass_filter::{create_smoothing_filter, LowPassFilter, NoSmoothing, SmoothingFilter};
pub use output::{
    ChannelPublisher, JointTrajectory, JointTrajectoryPoint, OutgoingCommand, ServoOutputs,
    ServoPublisher,
};
pub use parameters::{CommandInType, CommandOutType, RealtimeConfig, ServoParameters};
pub use status::StatusCode;
