// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the latest inputs of the servo.
//!
//! [`ServoInputs`] lives behind the servo mutex. Callers write into it from any thread and the
//! servo thread takes a [`CycleInputs`] snapshot at the start of every cycle.
use crate::servo::command::{ControlDimensionMask, DimensionMask, JointJogCommand, TwistCommand};
use std::time::Instant;

/// Latest commands and settings, written by the public entry points of the servo.
#[derive(Debug, Clone)]
pub struct ServoInputs {
    latest_twist: TwistCommand,
    latest_joint_jog: JointJogCommand,
    twist_stamp: Option<Instant>,
    joint_stamp: Option<Instant>,
    twist_is_nonzero: bool,
    joint_is_nonzero: bool,
    new_input_cmd: bool,
    collision_velocity_scale: f64,
    masks: ControlDimensionMask,
    paused: bool,
    reset_status: bool,
    command_frame: String,
}

/// Snapshot of [`ServoInputs`] used for one cycle.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub twist: TwistCommand,
    pub joint_jog: JointJogCommand,
    /// Stamp of the latest stamped twist. None if no twist was ever stamped.
    pub twist_stamp: Option<Instant>,
    pub joint_stamp: Option<Instant>,
    pub twist_is_nonzero: bool,
    pub joint_is_nonzero: bool,
    pub collision_velocity_scale: f64,
    pub masks: ControlDimensionMask,
    pub paused: bool,
    pub reset_status: bool,
    pub command_frame: String,
}

impl ServoInputs {
    pub fn new(command_frame: &str) -> Self {
        ServoInputs {
            latest_twist: TwistCommand::default(),
            latest_joint_jog: JointJogCommand::default(),
            twist_stamp: None,
            joint_stamp: None,
            twist_is_nonzero: false,
            joint_is_nonzero: false,
            new_input_cmd: false,
            collision_velocity_scale: 1.,
            masks: ControlDimensionMask::default(),
            paused: false,
            reset_status: false,
            command_frame: command_frame.to_string(),
        }
    }

    /// Replaces the latest twist. The stamp is only recorded if the command carries one.
    pub fn receive_twist(&mut self, command: TwistCommand) {
        self.twist_is_nonzero = command.is_nonzero();
        if command.stamp.is_some() {
            self.twist_stamp = command.stamp;
        }
        self.latest_twist = command;
        self.new_input_cmd = true;
    }

    /// Replaces the latest joint jog. The stamp is only recorded if the command carries one.
    pub fn receive_joint_jog(&mut self, command: JointJogCommand) {
        self.joint_is_nonzero = command.is_nonzero();
        if command.stamp.is_some() {
            self.joint_stamp = command.stamp;
        }
        self.latest_joint_jog = command;
        self.new_input_cmd = true;
    }

    /// Sets the collision velocity scale, clamped to \[0, 1\]. NaN is rejected and false is
    /// returned.
    pub fn set_collision_velocity_scale(&mut self, scale: f64) -> bool {
        if scale.is_nan() {
            return false;
        }
        self.collision_velocity_scale = scale.clamp(0., 1.);
        true
    }

    pub fn set_drift_dimensions(&mut self, drift_dimensions: DimensionMask) {
        self.masks.drift_dimensions = drift_dimensions;
    }

    pub fn set_control_dimensions(&mut self, control_dimensions: DimensionMask) {
        self.masks.control_dimensions = control_dimensions;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The status of the next cycle will be published as `NoWarning`.
    pub fn request_status_reset(&mut self) {
        self.reset_status = true;
    }

    pub fn set_command_frame(&mut self, command_frame: &str) {
        self.command_frame = command_frame.to_string();
    }

    pub fn command_frame(&self) -> &str {
        &self.command_frame
    }

    pub fn has_new_input(&self) -> bool {
        self.new_input_cmd
    }

    pub fn clear_new_input(&mut self) {
        self.new_input_cmd = false;
    }

    /// Takes the snapshot for the next cycle. A pending status reset is consumed.
    pub fn latch(&mut self) -> CycleInputs {
        let reset_status = self.reset_status;
        self.reset_status = false;
        CycleInputs {
            twist: self.latest_twist.clone(),
            joint_jog: self.latest_joint_jog.clone(),
            twist_stamp: self.twist_stamp,
            joint_stamp: self.joint_stamp,
            twist_is_nonzero: self.twist_is_nonzero,
            joint_is_nonzero: self.joint_is_nonzero,
            collision_velocity_scale: self.collision_velocity_scale,
            masks: self.masks,
            paused: self.paused,
            reset_status,
            command_frame: self.command_frame.clone(),
        }
    }
}
