// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`RobotTrajectory`], a timed sequence of joint group states.
use crate::model::{shortest_angular_distance, JointModelGroup, JointType};

/// State of all joints of a group at one point of a trajectory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waypoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
}

impl Waypoint {
    /// Creates a waypoint at rest.
    pub fn new(positions: &[f64]) -> Self {
        Waypoint {
            positions: positions.to_vec(),
            velocities: vec![0.; positions.len()],
            accelerations: vec![0.; positions.len()],
        }
    }

    pub fn with_velocities(mut self, velocities: &[f64]) -> Self {
        self.velocities = velocities.to_vec();
        self
    }

    pub fn with_accelerations(mut self, accelerations: &[f64]) -> Self {
        self.accelerations = accelerations.to_vec();
        self
    }

    /// Velocity of joint `index`, zero if no velocity is stored.
    pub fn velocity(&self, index: usize) -> f64 {
        self.velocities.get(index).copied().unwrap_or(0.)
    }

    /// Acceleration of joint `index`, zero if no acceleration is stored.
    pub fn acceleration(&self, index: usize) -> f64 {
        self.accelerations.get(index).copied().unwrap_or(0.)
    }
}

/// A sequence of waypoints of one joint group, each with its duration from the previous one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RobotTrajectory {
    group: Option<JointModelGroup>,
    waypoints: Vec<Waypoint>,
    durations_from_previous: Vec<f64>,
}

impl RobotTrajectory {
    /// Creates an empty trajectory for `group`.
    pub fn new(group: JointModelGroup) -> Self {
        RobotTrajectory {
            group: Some(group),
            ..Default::default()
        }
    }

    /// The group the trajectory was computed for. None if it was never set.
    pub fn group(&self) -> Option<&JointModelGroup> {
        self.group.as_ref()
    }

    pub fn waypoint_count(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn waypoint(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn first_waypoint(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn last_waypoint(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    /// duration from the previous waypoint in \[s\]
    pub fn duration_from_previous(&self, index: usize) -> Option<f64> {
        self.durations_from_previous.get(index).copied()
    }

    pub fn set_duration_from_previous(&mut self, index: usize, duration: f64) {
        if let Some(entry) = self.durations_from_previous.get_mut(index) {
            *entry = duration;
        }
    }

    pub fn add_suffix_waypoint(&mut self, waypoint: Waypoint, duration_from_previous: f64) {
        self.waypoints.push(waypoint);
        self.durations_from_previous.push(duration_from_previous);
    }

    /// Inserts `waypoint` at the front.
    pub fn add_prefix_waypoint(&mut self, waypoint: Waypoint, duration: f64) {
        self.waypoints.insert(0, waypoint);
        self.durations_from_previous.insert(0, duration);
    }

    /// Removes all waypoints. The group is kept.
    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.durations_from_previous.clear();
    }

    /// Total duration in \[s\].
    pub fn duration(&self) -> f64 {
        self.durations_from_previous.iter().sum()
    }

    /// Total duration divided by the number of waypoints. Zero for an empty trajectory.
    pub fn average_segment_duration(&self) -> f64 {
        if self.durations_from_previous.is_empty() {
            0.
        } else {
            self.duration() / self.durations_from_previous.len() as f64
        }
    }

    /// Time of every waypoint since the start of the trajectory.
    pub fn waypoint_times(&self) -> Vec<f64> {
        self.durations_from_previous
            .iter()
            .scan(0., |time, duration| {
                *time += duration;
                Some(*time)
            })
            .collect()
    }

    /// Removes the wraparound of continuous joints.
    ///
    /// The first waypoint is kept as it is. Every following position of a continuous joint is
    /// moved by a multiple of 2 PI so it is closest to its predecessor.
    pub fn unwind(&mut self) {
        let group = match &self.group {
            Some(group) => group,
            None => return,
        };
        for (index, joint) in group.joints.iter().enumerate() {
            if joint.joint_type != JointType::Continuous {
                continue;
            }
            let mut previous: Option<f64> = None;
            for waypoint in self.waypoints.iter_mut() {
                let position = match waypoint.positions.get_mut(index) {
                    Some(position) => position,
                    None => break,
                };
                if let Some(previous) = previous {
                    *position = previous + shortest_angular_distance(previous, *position);
                }
                previous = Some(*position);
            }
        }
    }
}
