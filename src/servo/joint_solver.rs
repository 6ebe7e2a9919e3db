// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Converts joint jog commands into joint position deltas.
use crate::servo::command::{CommandRejection, JointJogCommand};
use crate::servo::parameters::{CommandInType, ServoParameters};
use crate::utils::LogThrottle;
use nalgebra::DVector;
use std::collections::HashMap;
use tracing::warn;

/// Maps joint names to their index in the joint group.
pub fn joint_name_map(joint_names: &[String]) -> HashMap<String, usize> {
    joint_names
        .iter()
        .enumerate()
        .map(|(index, name)| (name.clone(), index))
        .collect()
}

/// Computes the joint delta of one control period for a jog command.
///
/// Joints which are not part of the group are ignored with a warning. Joints which are not
/// mentioned in the command do not move.
pub fn scale_joint_command(
    command: &JointJogCommand,
    name_map: &HashMap<String, usize>,
    parameters: &ServoParameters,
    throttle: &mut LogThrottle,
) -> Result<DVector<f64>, CommandRejection> {
    command.check_valid(parameters.command_in_type)?;
    let mut result = DVector::zeros(name_map.len());
    for (name, velocity) in command.joint_names.iter().zip(command.velocities.iter()) {
        let index = match name_map.get(name) {
            Some(index) => *index,
            None => {
                if throttle.ready("unknown_joint") {
                    warn!("Ignoring joint {}", name);
                }
                continue;
            }
        };
        result[index] = match parameters.command_in_type {
            CommandInType::Unitless => velocity * parameters.scale.joint * parameters.publish_period,
            CommandInType::SpeedUnits => velocity * parameters.publish_period,
        };
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::servo::command::{CommandRejection, JointJogCommand};
    use crate::servo::joint_solver::{joint_name_map, scale_joint_command};
    use crate::servo::parameters::{CommandInType, ServoParameters};
    use crate::utils::LogThrottle;

    #[test]
    fn jog_is_scaled_per_joint_test() {
        let names = vec!["joint1".to_string(), "joint2".to_string(), "joint3".to_string()];
        let map = joint_name_map(&names);
        let mut parameters = ServoParameters {
            publish_period: 0.01,
            ..Default::default()
        };
        let mut throttle = LogThrottle::default();
        let command = JointJogCommand::new(&["joint3", "elbow", "joint1"], &[1., 0.5, -0.5]);
        let delta = scale_joint_command(&command, &map, &parameters, &mut throttle).unwrap();
        assert_eq!(delta.len(), 3);
        assert!((delta[0] + 0.5 * 0.5 * 0.01).abs() < 1e-15);
        assert_eq!(delta[1], 0.);
        assert!((delta[2] - 0.5 * 0.01).abs() < 1e-15);

        parameters.command_in_type = CommandInType::SpeedUnits;
        let command = JointJogCommand::new(&["joint2"], &[2.]);
        let delta = scale_joint_command(&command, &map, &parameters, &mut throttle).unwrap();
        assert!((delta[1] - 0.02).abs() < 1e-15);
    }

    #[test]
    fn invalid_jog_is_rejected_test() {
        let map = joint_name_map(&["joint1".to_string()]);
        let parameters = ServoParameters::default();
        let mut throttle = LogThrottle::default();
        let command = JointJogCommand::new(&["joint1"], &[f64::NAN]);
        assert_eq!(
            scale_joint_command(&command, &map, &parameters, &mut throttle),
            Err(CommandRejection::ContainsNan)
        );
    }
}
