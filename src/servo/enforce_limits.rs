// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the safety limits which are applied to the joint motion of every cycle.
use crate::model::JointModelGroup;
use crate::servo::joint_state::JointState;
use crate::servo::status::StatusCode;
use nalgebra::DVector;

/// Scales `delta_theta` by the collision velocity scale and returns the resulting status.
pub fn apply_collision_scale(delta_theta: &mut DVector<f64>, collision_scale: f64) -> StatusCode {
    *delta_theta *= collision_scale;
    if collision_scale <= 0. {
        StatusCode::HaltForCollision
    } else if collision_scale < 1. {
        StatusCode::DecelerateForCollision
    } else {
        StatusCode::NoWarning
    }
}

/// Slows the motion of this cycle down until no joint exceeds its velocity bound.
///
/// The motion of all joints is scaled by the same factor so the direction of motion is kept.
/// Returns the applied factor.
pub fn enforce_velocity_limits(
    group: &JointModelGroup,
    original: &JointState,
    state: &mut JointState,
) -> f64 {
    let mut scale: f64 = 1.;
    for (joint, velocity) in group.joints.iter().zip(state.velocities.iter()) {
        if let Some(max_velocity) = joint.bounds.max_velocity {
            if velocity.abs() > max_velocity {
                scale = scale.min(max_velocity / velocity.abs());
            }
        }
    }
    if scale < 1. {
        state.positions = &original.positions + (&state.positions - &original.positions) * scale;
        state.velocities *= scale;
    }
    scale
}

/// Returns the indices of the joints which are within `margin` of a position bound and still
/// moving towards it.
pub fn enforce_position_limits(
    group: &JointModelGroup,
    state: &JointState,
    margin: f64,
) -> Vec<usize> {
    let mut joints_to_halt = Vec::new();
    for (index, joint) in group.joints.iter().enumerate() {
        let position = state.positions[index];
        let velocity = state.velocities[index];
        if joint.bounds.satisfies_position_bounds(position, -margin) {
            continue;
        }
        // joints without position bounds always satisfy them
        if let Some((min, max)) = joint.bounds.position {
            if (velocity < 0. && position < min + margin) || (velocity > 0. && position > max - margin)
            {
                joints_to_halt.push(index);
            }
        }
    }
    joints_to_halt
}

/// Puts the given joints back to their position at the start of the cycle and stops them.
pub fn sudden_halt(state: &mut JointState, original: &JointState, joints_to_halt: &[usize]) {
    for &index in joints_to_halt {
        if index < state.len() {
            state.positions[index] = original.positions[index];
            state.velocities[index] = 0.;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{JointModel, JointModelGroup, JointType, VariableBounds};
    use crate::servo::enforce_limits::{
        apply_collision_scale, enforce_position_limits, enforce_velocity_limits, sudden_halt,
    };
    use crate::servo::joint_state::JointState;
    use crate::servo::status::StatusCode;
    use nalgebra::DVector;

    fn group() -> JointModelGroup {
        let bounds = VariableBounds {
            position: Some((-1., 1.)),
            max_velocity: Some(2.),
            max_acceleration: None,
        };
        JointModelGroup::new(
            "arm",
            vec![
                JointModel::new("a", JointType::Revolute, bounds),
                JointModel::new("b", JointType::Revolute, bounds),
                JointModel::new("c", JointType::Continuous, VariableBounds::default()),
            ],
        )
    }

    fn joint_state(positions: &[f64], velocities: &[f64]) -> JointState {
        JointState {
            names: group().active_joint_names(),
            positions: DVector::from_column_slice(positions),
            velocities: DVector::from_column_slice(velocities),
        }
    }

    #[test]
    fn collision_scale_test() {
        let mut delta = DVector::from_column_slice(&[0.1, -0.2]);
        assert_eq!(apply_collision_scale(&mut delta, 1.), StatusCode::NoWarning);
        assert_eq!(
            apply_collision_scale(&mut delta, 0.5),
            StatusCode::DecelerateForCollision
        );
        assert!((delta[1] + 0.1).abs() < 1e-15);
        assert_eq!(apply_collision_scale(&mut delta, 0.), StatusCode::HaltForCollision);
        assert_eq!(delta[0], 0.);
    }

    #[test]
    fn velocity_limits_scale_uniformly_test() {
        let original = joint_state(&[0., 0., 0.], &[0., 0., 0.]);
        let mut state = joint_state(&[0.04, -0.01, 5.], &[4., -1., 500.]);
        // the continuous joint has no velocity bound
        let scale = enforce_velocity_limits(&group(), &original, &mut state);
        assert!((scale - 0.5).abs() < 1e-12);
        assert!((state.velocities[0] - 2.).abs() < 1e-12);
        assert!((state.velocities[1] + 0.5).abs() < 1e-12);
        assert!((state.positions[0] - 0.02).abs() < 1e-12);
        assert!((state.positions[2] - 2.5).abs() < 1e-12);
        let mut slow = joint_state(&[0.01, 0., 0.], &[1., 0., 0.]);
        assert_eq!(enforce_velocity_limits(&group(), &original, &mut slow), 1.);
        assert_eq!(slow.positions[0], 0.01);
    }

    #[test]
    fn position_limits_test() {
        let state = joint_state(&[0.95, -0.95, 100.], &[0.1, 0.1, 1.]);
        assert_eq!(enforce_position_limits(&group(), &state, 0.1), vec![0]);
        let state = joint_state(&[0.95, -0.95, 100.], &[-0.1, -0.1, 1.]);
        assert_eq!(enforce_position_limits(&group(), &state, 0.1), vec![1]);
        let state = joint_state(&[0.5, -0.5, 100.], &[1., -1., 1.]);
        assert!(enforce_position_limits(&group(), &state, 0.1).is_empty());
    }

    #[test]
    fn sudden_halt_test() {
        let original = joint_state(&[0.1, 0.2, 0.3], &[0., 0., 0.]);
        let mut state = joint_state(&[0.2, 0.3, 0.4], &[1., 1., 1.]);
        sudden_halt(&mut state, &original, &[1, 7]);
        assert_eq!(state.positions[1], 0.2);
        assert_eq!(state.velocities[1], 0.);
        assert_eq!(state.positions[0], 0.2);
        assert_eq!(state.velocities[2], 1.);
    }
}
