// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use servo::model::planar_arm::PLANAR_ARM_GROUP;
use servo::{
    ChannelPublisher, JointJogCommand, OutgoingCommand, PlanarArmMonitor, PlanarArmState, Servo,
    ServoParameters, ServoResult, StateMonitor, StatusCode, TwistCommand, VariableBounds,
};

/// An example which jogs a simulated planar arm with the servo.
///
/// The end effector is first moved along the x-axis of the base with a Cartesian twist, then
/// the first joint is jogged. The published positions are fed back into the simulated arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "jog_planar_arm")]
struct CommandLineArguments {
    /// TOML file with servo parameters. The defaults are used if it is omitted.
    #[clap(short, long)]
    pub config: Option<String>,
    /// Duration of each jog in seconds
    #[clap(short, long, default_value = "2.0")]
    pub duration: f64,
    /// Linear velocity of the Cartesian jog in m/s
    #[clap(short, long, default_value = "0.05")]
    pub velocity: f64,
    /// Compute a command as soon as a new one arrives
    #[clap(short, long, action)]
    pub low_latency: bool,
    /// Write every status change with its numeric code to this TOML file
    #[clap(long)]
    pub status_log: Option<String>,
}

/// A status change, `time` in seconds since the servo was started.
#[derive(Serialize, Debug)]
struct StatusEntry {
    time: f64,
    code: StatusCode,
}

#[derive(Serialize, Debug, Default)]
struct StatusLog {
    status: Vec<StatusEntry>,
}

fn main() -> ServoResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = CommandLineArguments::parse();

    let mut parameters = match &args.config {
        Some(path) => ServoParameters::load(path)?,
        None => ServoParameters {
            move_group_name: PLANAR_ARM_GROUP.to_string(),
            publish_period: 0.01,
            smoothing_filter_plugin_name: "none".to_string(),
            ..Default::default()
        },
    };
    parameters.low_latency_mode |= args.low_latency;
    let publish_period = Duration::from_secs_f64(parameters.publish_period);
    // without published positions the simulated arm cannot follow
    let publishes_positions = parameters.publish_joint_positions;

    let bounds = VariableBounds {
        position: Some((-2.8, 2.8)),
        max_velocity: Some(2.),
        max_acceleration: Some(5.),
    };
    let arm = PlanarArmState::new(&[0.5, 0.4, 0.3], bounds).with_positions(&[0.3, 0.8, 0.6]);
    let monitor = Arc::new(PlanarArmMonitor::new(arm));
    let (publisher, outputs) = ChannelPublisher::new(100);
    let mut servo = Servo::new(parameters, monitor.clone(), Box::new(publisher))?;
    servo.start()?;
    println!("Servo started, jogging the end effector along x");

    let started = Instant::now();
    let mut status_log = StatusLog::default();
    let mut last_status = StatusCode::NoWarning;
    let mut jog = |command: &dyn Fn() -> (Option<TwistCommand>, Option<JointJogCommand>)| {
        let start = Instant::now();
        while start.elapsed().as_secs_f64() < args.duration {
            match command() {
                (Some(twist), _) => servo.twist_command(twist),
                (_, Some(joint_jog)) => servo.joint_command(joint_jog),
                _ => {}
            }
            while let Ok(outgoing) = outputs.commands.recv_timeout(publish_period) {
                let positions = match outgoing {
                    OutgoingCommand::Trajectory(trajectory) => trajectory
                        .points
                        .first()
                        .map(|point| point.positions.clone())
                        .unwrap_or_default(),
                    OutgoingCommand::MultiArray(values) => values,
                };
                if publishes_positions && !positions.is_empty() {
                    monitor.update(|state| state.set_positions(&positions));
                }
                if outputs.commands.is_empty() {
                    break;
                }
            }
            for status in outputs.status.try_iter() {
                if status != last_status {
                    println!("Servo status changed to: {}", status);
                    status_log.status.push(StatusEntry {
                        time: started.elapsed().as_secs_f64(),
                        code: status,
                    });
                    last_status = status;
                }
            }
        }
    };

    let velocity = args.velocity;
    jog(&|| {
        (
            Some(TwistCommand::new("base_link", [velocity, 0., 0.], [0., 0., 0.])),
            None,
        )
    });
    println!("Jogging the first joint");
    jog(&|| (None, Some(JointJogCommand::new(&["joint1"], &[0.3]))));

    servo.stop()?;
    let positions: Vec<f64> = monitor.current_state().positions().iter().copied().collect();
    println!("Finished jogging, final joint positions: {:?}", positions);
    if let Some(path) = &args.status_log {
        match toml::to_string(&status_log) {
            Ok(document) => {
                if let Err(error) = std::fs::write(path, document) {
                    eprintln!("Cannot write the status log to {}: {}", path, error);
                }
            }
            Err(error) => eprintln!("Cannot serialize the status log: {}", error),
        }
    }
    Ok(())
}
