// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::f64::consts::PI;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use servo::{
    apply_smoothing, JointModel, JointModelGroup, JointType, RobotTrajectory, ServoResult,
    VariableBounds, Waypoint,
};

/// An example showing how to smooth a coarse joint trajectory with jerk limits.
///
/// A sine wave is sampled at a few waypoints and smoothed into a trajectory with one waypoint
/// per millisecond.
#[derive(Parser, Debug)]
#[clap(author, version, name = "smooth_trajectory")]
struct CommandLineArguments {
    /// Number of waypoints of the coarse trajectory
    #[clap(short, long, default_value = "10")]
    pub waypoints: usize,
    /// Scales the velocity limits of the joints
    #[clap(long, default_value = "0.5")]
    pub velocity_scaling: f64,
    /// Scales the acceleration limits of the joints
    #[clap(long, default_value = "0.5")]
    pub acceleration_scaling: f64,
}

fn main() -> ServoResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = CommandLineArguments::parse();

    let bounds = VariableBounds {
        position: Some((-PI, PI)),
        max_velocity: Some(2.),
        max_acceleration: Some(5.),
    };
    let group = JointModelGroup::new(
        "arm",
        vec![
            JointModel::new("shoulder", JointType::Revolute, bounds),
            JointModel::new("elbow", JointType::Revolute, bounds),
            JointModel::new("wrist", JointType::Continuous, VariableBounds::default()),
        ],
    );
    let mut trajectory = RobotTrajectory::new(group);
    let count = args.waypoints.max(2);
    for i in 0..count {
        let phase = i as f64 / (count - 1) as f64 * PI;
        let positions = [0.5 * phase.sin(), -0.3 * phase.sin(), 2. * phase];
        let duration = if i == 0 { 0. } else { 0.5 };
        trajectory.add_suffix_waypoint(Waypoint::new(&positions), duration);
    }
    println!(
        "Smoothing {} waypoints lasting {:.3} s",
        trajectory.waypoint_count(),
        trajectory.duration()
    );

    apply_smoothing(
        &mut trajectory,
        args.velocity_scaling,
        args.acceleration_scaling,
    )?;

    println!(
        "Smoothed trajectory has {} waypoints lasting {:.3} s",
        trajectory.waypoint_count(),
        trajectory.duration()
    );
    if let Some(last) = trajectory.last_waypoint() {
        println!("Final positions: {:?}", last.positions);
    }
    Ok(())
}
