// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the singular value decomposition of the Jacobian and the velocity scaling close to
//! singularities.
use crate::model::{JointModelGroup, KinematicState};
use crate::servo::cartesian_solver::remove_drift_dimensions;
use crate::servo::command::DimensionMask;
use crate::servo::status::StatusCode;
use nalgebra::{DMatrix, DVector};

/// Singular values at or below this value are treated as zero when inverting.
pub static PSEUDO_INVERSE_EPSILON: f64 = 1e-12;
/// The look-ahead step is the toward-singularity vector divided by this value.
pub static LOOK_AHEAD_SCALE: f64 = 100.;

/// Ratio of the largest to the smallest singular value. Infinite if the smallest is zero.
pub fn condition_number(singular_values: &DVector<f64>) -> f64 {
    let max = singular_values.iter().cloned().fold(0., f64::max);
    let min = singular_values.iter().cloned().fold(f64::INFINITY, f64::min);
    if min > 0. {
        max / min
    } else {
        f64::INFINITY
    }
}

/// Thin singular value decomposition of a Jacobian together with its pseudo-inverse.
#[derive(Debug, Clone)]
pub struct JacobianSvd {
    pub u: DMatrix<f64>,
    pub singular_values: DVector<f64>,
    /// V * S^+ * U^T
    pub pseudo_inverse: DMatrix<f64>,
}

impl JacobianSvd {
    /// Decomposes `jacobian`. Returns None for an empty matrix.
    pub fn new(jacobian: DMatrix<f64>) -> Option<Self> {
        if jacobian.is_empty() {
            return None;
        }
        let svd = jacobian.svd(true, true);
        let u = svd.u?;
        let v_t = svd.v_t?;
        let singular_values = svd.singular_values;
        let inverted = singular_values.map(|s| {
            if s > PSEUDO_INVERSE_EPSILON {
                1. / s
            } else {
                0.
            }
        });
        let pseudo_inverse = v_t.transpose() * DMatrix::from_diagonal(&inverted) * u.transpose();
        Some(JacobianSvd {
            u,
            singular_values,
            pseudo_inverse,
        })
    }

    pub fn condition_number(&self) -> f64 {
        condition_number(&self.singular_values)
    }

    /// Left singular vector of the smallest singular value. Its sign is arbitrary.
    pub fn smallest_singular_direction(&self) -> DVector<f64> {
        let index = self
            .singular_values
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |smallest, (i, &value)| {
                if value < smallest.1 {
                    (i, value)
                } else {
                    smallest
                }
            })
            .0;
        self.u.column(index).into_owned()
    }
}

/// Result of the singularity analysis of one cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SingularityScaling {
    /// Factor in \[0, 1\] which is applied to the joint motion.
    pub scale: f64,
    pub condition: f64,
    pub status: StatusCode,
}

/// Scale for a motion towards a singularity with the given condition number.
///
/// 1 up to `lower_threshold`, linear down to 0 at `hard_stop_threshold` and 0 beyond.
pub fn singularity_ramp(condition: f64, lower_threshold: f64, hard_stop_threshold: f64) -> f64 {
    if condition >= hard_stop_threshold {
        0.
    } else if condition > lower_threshold {
        1. - (condition - lower_threshold) / (hard_stop_threshold - lower_threshold)
    } else {
        1.
    }
}

/// Computes how much a Cartesian motion has to be slowed down because of a nearby singularity.
///
/// The direction towards the singularity is the left singular vector of the smallest singular
/// value. Its sign is resolved by looking ahead: a private copy of `state` is moved a small step
/// along the vector and the Jacobian condition number is compared. Only motions towards the
/// singularity are slowed down.
///
/// # Arguments
/// * `state` - Current robot state. It is not modified.
/// * `drift_dimensions` - Dimensions which were removed from the Jacobian of `svd`.
/// * `commanded_velocity` - Cartesian delta after drift dimensions were removed.
/// * `svd` - Decomposition of the reduced Jacobian.
pub fn velocity_scaling_factor_for_singularity<S: KinematicState>(
    state: &S,
    group: &JointModelGroup,
    drift_dimensions: &DimensionMask,
    commanded_velocity: &DVector<f64>,
    svd: &JacobianSvd,
    lower_threshold: f64,
    hard_stop_threshold: f64,
) -> SingularityScaling {
    let mut vector_toward_singularity = svd.smallest_singular_direction();
    let initial_condition = svd.condition_number();

    let delta_x = &vector_toward_singularity / LOOK_AHEAD_SCALE;
    let new_theta = state.joint_group_positions(group) + &svd.pseudo_inverse * delta_x;
    let mut look_ahead_state = state.clone();
    look_ahead_state.set_joint_group_positions(group, &new_theta);
    let mut new_jacobian = look_ahead_state.jacobian(group);
    let mut unused_delta = DVector::zeros(new_jacobian.nrows());
    remove_drift_dimensions(&mut new_jacobian, &mut unused_delta, drift_dimensions);
    let new_condition = condition_number(&new_jacobian.singular_values());
    // the vector has to point towards an increasing condition number
    if initial_condition >= new_condition {
        vector_toward_singularity *= -1.;
    }

    let mut scaling = SingularityScaling {
        scale: 1.,
        condition: initial_condition,
        status: StatusCode::NoWarning,
    };
    if vector_toward_singularity.dot(commanded_velocity) > 0. {
        scaling.scale = singularity_ramp(initial_condition, lower_threshold, hard_stop_threshold);
        if initial_condition >= hard_stop_threshold {
            scaling.status = StatusCode::HaltForSingularity;
        } else if initial_condition > lower_threshold {
            scaling.status = StatusCode::DecelerateForSingularity;
        }
    }
    scaling
}

#[cfg(test)]
mod tests {
    use crate::model::planar_arm::PlanarArmState;
    use crate::model::KinematicState;
    use crate::servo::cartesian_solver::remove_drift_dimensions;
    use crate::servo::command::DimensionMask;
    use crate::servo::singularity::{
        condition_number, singularity_ramp, velocity_scaling_factor_for_singularity, JacobianSvd,
    };
    use crate::servo::status::StatusCode;
    use nalgebra::{DMatrix, DVector};

    fn planar_drift() -> DimensionMask {
        DimensionMask([false, false, true, true, true, true])
    }

    #[test]
    fn ramp_test() {
        assert_eq!(singularity_ramp(17., 17., 30.), 1.);
        assert_eq!(singularity_ramp(30., 17., 30.), 0.);
        assert_eq!(singularity_ramp(1e9, 17., 30.), 0.);
        assert_eq!(singularity_ramp(f64::INFINITY, 17., 30.), 0.);
        assert!((singularity_ramp(23.5, 17., 30.) - 0.5).abs() < 1e-12);
        let mut last = 1.;
        for i in 0..=130 {
            let scale = singularity_ramp(17. + 0.1 * i as f64, 17., 30.);
            assert!(scale <= last);
            last = scale;
        }
    }

    #[test]
    fn pseudo_inverse_test() {
        let jacobian = DMatrix::from_row_slice(3, 2, &[1., 0., 0., 2., 0., 0.]);
        let svd = JacobianSvd::new(jacobian.clone()).unwrap();
        let identity = &svd.pseudo_inverse * &jacobian;
        assert!((identity - DMatrix::identity(2, 2)).norm() < 1e-12);
        assert!((svd.condition_number() - 2.).abs() < 1e-12);
        assert_eq!(
            condition_number(&DVector::from_column_slice(&[1., 0.])),
            f64::INFINITY
        );
        let rank_deficient = DMatrix::from_row_slice(2, 2, &[1., 1., 1., 1.]);
        let svd = JacobianSvd::new(rank_deficient).unwrap();
        assert!(svd.pseudo_inverse.iter().all(|x| x.is_finite()));
        assert!(JacobianSvd::new(DMatrix::zeros(0, 0)).is_none());
    }

    #[test]
    fn slows_down_only_towards_singularity_test() {
        let arm = PlanarArmState::new(&[1., 1.], Default::default()).with_positions(&[0., 0.6]);
        let group = arm.group().clone();
        let mut jacobian = arm.jacobian(&group);
        let mut outward = DVector::from_column_slice(&[0.01, 0., 0., 0., 0., 0.]);
        remove_drift_dimensions(&mut jacobian, &mut outward, &planar_drift());
        assert_eq!(jacobian.nrows(), 2);
        let svd = JacobianSvd::new(jacobian).unwrap();
        let condition = svd.condition_number();
        assert!(condition > 4. && condition < 16.);

        let scaling = velocity_scaling_factor_for_singularity(
            &arm,
            &group,
            &planar_drift(),
            &outward,
            &svd,
            4.,
            16.,
        );
        assert!(scaling.scale > 0. && scaling.scale < 1.);
        assert!((scaling.scale - singularity_ramp(condition, 4., 16.)).abs() < 1e-12);
        assert_eq!(scaling.status, StatusCode::DecelerateForSingularity);
        assert_eq!(scaling.condition, condition);

        let inward = -outward.clone();
        let scaling = velocity_scaling_factor_for_singularity(
            &arm,
            &group,
            &planar_drift(),
            &inward,
            &svd,
            4.,
            16.,
        );
        assert_eq!(scaling.scale, 1.);
        assert_eq!(scaling.status, StatusCode::NoWarning);
        assert_eq!(arm.positions()[1], 0.6);

        let scaling = velocity_scaling_factor_for_singularity(
            &arm,
            &group,
            &planar_drift(),
            &outward,
            &svd,
            1.,
            2.,
        );
        assert_eq!(scaling.scale, 0.);
        assert_eq!(scaling.status, StatusCode::HaltForSingularity);
    }
}
