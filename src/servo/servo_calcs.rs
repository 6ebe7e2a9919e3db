// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the computation of a single servo cycle.
use crate::exception::{ServoException, ServoResult};
use crate::model::{JointModelGroup, KinematicState};
use crate::servo::cartesian_solver::solve_twist;
use crate::servo::enforce_limits::{
    apply_collision_scale, enforce_position_limits, enforce_velocity_limits, sudden_halt,
};
use crate::servo::frame_transforms::FrameTransforms;
use crate::servo::ingress::CycleInputs;
use crate::servo::joint_solver::{joint_name_map, scale_joint_command};
use crate::servo::joint_state::JointState;
use crate::servo::low_pass_filter::SmoothingFilter;
use crate::servo::output::{
    compose_joint_trajectory, initial_command, insert_redundant_points, to_outgoing_command,
    JointTrajectory, JointTrajectoryPoint, ServoPublisher, GAZEBO_REDUNDANT_MESSAGE_COUNT,
};
use crate::servo::parameters::ServoParameters;
use crate::servo::status::StatusCode;
use crate::utils::LogThrottle;
use nalgebra::DVector;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Joint velocities below this value in \[rad/s\] count as stopped.
pub static STOPPED_VELOCITY_EPS: f64 = 1e-4;

#[derive(Debug, Copy, Clone, PartialEq)]
enum ServoType {
    CartesianSpace,
    JointSpace,
}

/// Returns true if `stamp` is missing or older than `timeout` at `now`.
fn is_stale(stamp: Option<Instant>, now: Instant, timeout: Duration) -> bool {
    match stamp {
        Some(stamp) => now.saturating_duration_since(stamp) >= timeout,
        None => true,
    }
}

/// State and computation of the servo cycle.
///
/// Everything in here is owned by the servo thread. Shared inputs are passed in as a
/// [`CycleInputs`] snapshot.
pub struct ServoCalcs {
    parameters: ServoParameters,
    group: JointModelGroup,
    name_map: HashMap<String, usize>,
    smoother: Box<dyn SmoothingFilter>,
    publisher: Box<dyn ServoPublisher>,
    status: StatusCode,
    wait_for_servo_commands: bool,
    done_stopping: bool,
    ok_to_publish: bool,
    updated_filters: bool,
    zero_velocity_count: u32,
    last_sent_command: JointTrajectory,
    original_joint_state: JointState,
    frame_transforms: FrameTransforms,
    throttle: LogThrottle,
}

impl ServoCalcs {
    /// Prepares the servo cycle.
    ///
    /// # Arguments
    /// * `parameters` - Validated parameters.
    /// * `state` - Current state of the robot.
    /// * `smoother` - Filter for the joint positions. It is initialized here.
    /// * `publisher` - Receives all outputs.
    /// # Errors
    /// * InvalidGroupException if the model does not know `move_group_name`.
    /// * KinematicsException if one of the configured frames is unknown.
    /// * SmoothingPluginException if the filter cannot be initialized.
    pub fn new<S: KinematicState>(
        parameters: ServoParameters,
        state: &S,
        mut smoother: Box<dyn SmoothingFilter>,
        publisher: Box<dyn ServoPublisher>,
    ) -> ServoResult<Self> {
        let group = state
            .joint_model_group(&parameters.move_group_name)
            .ok_or_else(|| ServoException::InvalidGroupException {
                group: parameters.move_group_name.clone(),
            })?;
        let original_joint_state = JointState::from_kinematic_state(state, &group);
        let frame_transforms = FrameTransforms::compute(
            state,
            &parameters.planning_frame,
            &parameters.robot_link_command_frame,
            &parameters.ee_frame_name,
        )
        .ok_or_else(|| ServoException::KinematicsException {
            message: format!(
                "cannot resolve the frames {}, {} and {}",
                parameters.planning_frame,
                parameters.robot_link_command_frame,
                parameters.ee_frame_name
            ),
        })?;
        smoother.initialize(&group, group.variable_count())?;
        smoother.reset(original_joint_state.positions.as_slice());
        debug!("servoing group {}", group);
        Ok(ServoCalcs {
            name_map: joint_name_map(&original_joint_state.names),
            last_sent_command: initial_command(&original_joint_state, &parameters),
            parameters,
            group,
            smoother,
            publisher,
            status: StatusCode::NoWarning,
            wait_for_servo_commands: true,
            done_stopping: false,
            ok_to_publish: false,
            updated_filters: false,
            zero_velocity_count: 0,
            original_joint_state,
            frame_transforms,
            throttle: LogThrottle::default(),
        })
    }

    pub fn parameters(&self) -> &ServoParameters {
        &self.parameters
    }

    pub fn group(&self) -> &JointModelGroup {
        &self.group
    }

    /// True until the first stamped command arrived.
    pub fn is_waiting_for_commands(&self) -> bool {
        self.wait_for_servo_commands
    }

    /// Transforms computed in the latest cycle.
    pub fn frame_transforms(&self) -> FrameTransforms {
        self.frame_transforms
    }

    /// The command which was published last.
    pub fn last_sent_command(&self) -> &JointTrajectory {
        &self.last_sent_command
    }

    fn raise_status(&mut self, status: StatusCode) {
        self.status = self.status.escalate(status);
    }

    /// Runs one servo cycle.
    ///
    /// # Arguments
    /// * `state` - Current state of the robot.
    /// * `inputs` - Inputs latched for this cycle.
    /// * `now` - Time used for the staleness checks.
    pub fn calculate_single_iteration<S: KinematicState>(
        &mut self,
        state: &S,
        inputs: &CycleInputs,
        now: Instant,
    ) {
        if inputs.reset_status {
            self.status = StatusCode::NoWarning;
        }
        self.publisher.publish_status(self.status);
        self.status = StatusCode::NoWarning;

        self.update_joints(state);

        let timeout = Duration::from_secs_f64(self.parameters.incoming_command_timeout);
        let twist_command_is_stale = is_stale(inputs.twist_stamp, now, timeout);
        let joint_command_is_stale = is_stale(inputs.joint_stamp, now, timeout);

        match FrameTransforms::compute(
            state,
            &self.parameters.planning_frame,
            &inputs.command_frame,
            &self.parameters.ee_frame_name,
        ) {
            Some(transforms) => self.frame_transforms = transforms,
            None => {
                if self.throttle.ready("frame_transforms") {
                    warn!(
                        "Cannot compute the transform to command frame {}",
                        inputs.command_frame
                    );
                }
            }
        }

        let have_nonzero_command = inputs.twist_is_nonzero || inputs.joint_is_nonzero;
        self.updated_filters = false;

        if inputs.twist_stamp.is_some() || inputs.joint_stamp.is_some() {
            self.wait_for_servo_commands = false;
        }
        // keep the filter on the current joints so resuming does not jump
        if self.wait_for_servo_commands || inputs.paused {
            self.reset_filters();
            return;
        }

        let mut holding = false;
        let mut joint_trajectory = if inputs.twist_is_nonzero && !twist_command_is_stale {
            match self.cartesian_servo_calcs(state, inputs) {
                Some(trajectory) => trajectory,
                None => {
                    self.reset_filters();
                    return;
                }
            }
        } else if inputs.joint_is_nonzero && !joint_command_is_stale {
            match self.joint_servo_calcs(inputs) {
                Some(trajectory) => trajectory,
                None => {
                    self.reset_filters();
                    return;
                }
            }
        } else {
            holding = true;
            let mut trajectory = self.last_sent_command.clone();
            for point in trajectory.points.iter_mut() {
                point.velocities.iter_mut().for_each(|v| *v = 0.);
            }
            trajectory
        };

        if twist_command_is_stale && joint_command_is_stale {
            self.filtered_halt(&mut joint_trajectory);
        } else {
            self.done_stopping = holding;
        }

        let num_halt_msgs = self.parameters.num_outgoing_halt_msgs_to_publish;
        if !have_nonzero_command
            && self.done_stopping
            && num_halt_msgs != 0
            && self.zero_velocity_count > num_halt_msgs
        {
            self.ok_to_publish = false;
            if self.throttle.ready("all_zero") {
                debug!("All-zero command. Doing nothing.");
            }
        } else if twist_command_is_stale && joint_command_is_stale {
            self.ok_to_publish = false;
            if self.throttle.ready("stale") {
                debug!("Skipping publishing because incoming commands are stale.");
            }
        } else {
            self.ok_to_publish = true;
        }

        if !have_nonzero_command && self.done_stopping {
            self.zero_velocity_count = self.zero_velocity_count.saturating_add(1);
        } else {
            self.zero_velocity_count = 0;
        }

        if self.ok_to_publish {
            let command = to_outgoing_command(&mut joint_trajectory, &self.parameters);
            self.last_sent_command = joint_trajectory;
            self.publisher.publish_command(command);
        }

        if !self.updated_filters {
            self.reset_filters();
        }
    }

    fn update_joints<S: KinematicState>(&mut self, state: &S) {
        self.original_joint_state = JointState::from_kinematic_state(state, &self.group);
    }

    fn reset_filters(&mut self) {
        if !self
            .smoother
            .reset(self.original_joint_state.positions.as_slice())
            && self.throttle.ready("filter_reset")
        {
            warn!("The smoothing filter could not be reset");
        }
        self.updated_filters = true;
    }

    fn cartesian_servo_calcs<S: KinematicState>(
        &mut self,
        state: &S,
        inputs: &CycleInputs,
    ) -> Option<JointTrajectory> {
        let result = solve_twist(
            &inputs.twist,
            state,
            &self.group,
            &self.frame_transforms,
            &inputs.command_frame,
            &inputs.masks,
            &self.parameters,
        );
        match result {
            Ok(delta) => {
                self.publisher.publish_condition(delta.singularity.condition);
                if delta.singularity.status != StatusCode::NoWarning
                    && self.throttle.ready("singularity")
                {
                    warn!("{}", delta.singularity.status);
                }
                self.raise_status(delta.singularity.status);
                self.internal_servo_update(
                    delta.delta_theta,
                    inputs.collision_velocity_scale,
                    ServoType::CartesianSpace,
                )
            }
            Err(failure) => {
                if self.throttle.ready("cartesian_command") {
                    warn!("{}", failure);
                }
                None
            }
        }
    }

    fn joint_servo_calcs(&mut self, inputs: &CycleInputs) -> Option<JointTrajectory> {
        match scale_joint_command(
            &inputs.joint_jog,
            &self.name_map,
            &self.parameters,
            &mut self.throttle,
        ) {
            Ok(delta_theta) => self.internal_servo_update(
                delta_theta,
                inputs.collision_velocity_scale,
                ServoType::JointSpace,
            ),
            Err(rejection) => {
                if self.throttle.ready("joint_command") {
                    warn!("{}", rejection);
                }
                None
            }
        }
    }

    fn internal_servo_update(
        &mut self,
        mut delta_theta: DVector<f64>,
        collision_velocity_scale: f64,
        servo_type: ServoType,
    ) -> Option<JointTrajectory> {
        let mut internal_joint_state = self.original_joint_state.clone();

        let collision_status = apply_collision_scale(&mut delta_theta, collision_velocity_scale);
        match collision_status {
            StatusCode::DecelerateForCollision => {
                if self.throttle.ready("collision") {
                    warn!("{}", collision_status);
                }
            }
            StatusCode::HaltForCollision => {
                if self.throttle.ready("collision") {
                    error!("Halting for collision!");
                }
            }
            _ => {}
        }
        self.raise_status(collision_status);

        if !self.apply_joint_update(&delta_theta, &mut internal_joint_state) {
            return None;
        }
        self.updated_filters = true;

        let velocity_scale = enforce_velocity_limits(
            &self.group,
            &self.original_joint_state,
            &mut internal_joint_state,
        );
        if velocity_scale < 1. && self.throttle.ready("velocity_limit") {
            debug!("Scaled the joint motion by {} to respect velocity limits", velocity_scale);
        }

        let joints_to_halt = enforce_position_limits(
            &self.group,
            &internal_joint_state,
            self.parameters.joint_limit_margin,
        );
        if !joints_to_halt.is_empty() {
            self.raise_status(StatusCode::JointBound);
            if self.throttle.ready("position_limit") {
                let names: Vec<&str> = joints_to_halt
                    .iter()
                    .map(|&index| internal_joint_state.names[index].as_str())
                    .collect();
                warn!("{} close to a position limit. Halting.", names.join(", "));
            }
            let halt_all = match servo_type {
                ServoType::JointSpace => self.parameters.halt_all_joints_in_joint_mode,
                ServoType::CartesianSpace => self.parameters.halt_all_joints_in_cartesian_mode,
            };
            if halt_all {
                let all_joints: Vec<usize> = (0..internal_joint_state.len()).collect();
                sudden_halt(
                    &mut internal_joint_state,
                    &self.original_joint_state,
                    &all_joints,
                );
            } else {
                sudden_halt(
                    &mut internal_joint_state,
                    &self.original_joint_state,
                    &joints_to_halt,
                );
            }
        }

        let mut joint_trajectory = compose_joint_trajectory(&internal_joint_state, &self.parameters);
        if self.parameters.use_gazebo {
            insert_redundant_points(
                &mut joint_trajectory,
                GAZEBO_REDUNDANT_MESSAGE_COUNT,
                self.parameters.publish_period,
            );
        }
        Some(joint_trajectory)
    }

    /// Adds `delta_theta` to the joint positions, smooths them and derives the velocities.
    fn apply_joint_update(&mut self, delta_theta: &DVector<f64>, joint_state: &mut JointState) -> bool {
        if joint_state.positions.len() != delta_theta.len()
            || joint_state.velocities.len() != joint_state.positions.len()
        {
            if self.throttle.ready("joint_update") {
                error!("Lengths of output and increments do not match.");
            }
            return false;
        }
        joint_state.positions += delta_theta;
        if !self.smoother.do_smoothing(joint_state.positions.as_mut_slice())
            && self.throttle.ready("smoothing")
        {
            warn!("The smoothing filter rejected the joint positions");
        }
        joint_state.velocities = (&joint_state.positions - &self.original_joint_state.positions)
            / self.parameters.publish_period;
        true
    }

    /// Decelerates towards the joint positions at the start of the cycle.
    fn filtered_halt(&mut self, joint_trajectory: &mut JointTrajectory) {
        let period = self.parameters.publish_period;
        let original = &self.original_joint_state;
        let mut point = JointTrajectoryPoint {
            positions: original.positions.as_slice().to_vec(),
            time_from_start: Duration::from_secs_f64(period),
            ..Default::default()
        };
        self.smoother.do_smoothing(&mut point.positions);
        self.done_stopping = true;
        if self.parameters.publish_joint_velocities {
            point.velocities = point
                .positions
                .iter()
                .zip(original.positions.iter())
                .map(|(position, original_position)| (position - original_position) / period)
                .collect();
            if point
                .velocities
                .iter()
                .any(|velocity| velocity.abs() > STOPPED_VELOCITY_EPS)
            {
                self.done_stopping = false;
            } else {
                point.velocities.iter_mut().for_each(|v| *v = 0.);
            }
        }
        if self.parameters.publish_joint_accelerations {
            point.accelerations = original
                .velocities
                .iter()
                .enumerate()
                .map(|(i, original_velocity)| {
                    (point.velocities.get(i).copied().unwrap_or(0.) - original_velocity) / period
                })
                .collect();
        }
        joint_trajectory.points = vec![point];
    }
}

#[cfg(test)]
mod tests {
    use crate::model::planar_arm::{PlanarArmState, PLANAR_ARM_EE_FRAME, PLANAR_ARM_GROUP};
    use crate::model::{KinematicState, VariableBounds};
    use crate::servo::command::{DimensionMask, JointJogCommand, TwistCommand};
    use crate::servo::ingress::ServoInputs;
    use crate::servo::low_pass_filter::{NoSmoothing, SmoothingFilter};
    use crate::servo::output::{
        ChannelPublisher, OutgoingCommand, ServoOutputs, ServoPublisher,
    };
    use crate::servo::parameters::{CommandOutType, ServoParameters};
    use crate::servo::servo_calcs::ServoCalcs;
    use crate::servo::status::StatusCode;
    use crate::exception::{ServoException, ServoResult};
    use crate::model::JointModelGroup;
    use mockall::{mock, Sequence};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    mock! {
        Publisher {}
        impl ServoPublisher for Publisher {
            fn publish_command(&mut self, command: OutgoingCommand);
            fn publish_status(&mut self, status: StatusCode);
            fn publish_condition(&mut self, condition: f64);
        }
    }

    /// Records every reset so tests can check that the filter is kept warm.
    struct RecordingFilter {
        resets: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl SmoothingFilter for RecordingFilter {
        fn initialize(&mut self, _group: &JointModelGroup, _num_joints: usize) -> ServoResult<()> {
            Ok(())
        }
        fn do_smoothing(&mut self, _positions: &mut [f64]) -> bool {
            true
        }
        fn reset(&mut self, positions: &[f64]) -> bool {
            self.resets.lock().unwrap().push(positions.to_vec());
            true
        }
    }

    fn parameters() -> ServoParameters {
        ServoParameters {
            move_group_name: PLANAR_ARM_GROUP.to_string(),
            publish_period: 0.01,
            smoothing_filter_plugin_name: "none".to_string(),
            ..Default::default()
        }
    }

    fn arm() -> PlanarArmState {
        let bounds = VariableBounds {
            position: Some((-2., 2.)),
            max_velocity: Some(3.),
            max_acceleration: None,
        };
        PlanarArmState::new(&[1., 0.8, 0.5], bounds).with_positions(&[0.2, 0.9, 0.7])
    }

    fn channel_calcs(parameters: ServoParameters, arm: &PlanarArmState) -> (ServoCalcs, ServoOutputs) {
        let (publisher, outputs) = ChannelPublisher::new(100);
        let calcs = ServoCalcs::new(parameters, arm, Box::new(NoSmoothing), Box::new(publisher))
            .unwrap();
        (calcs, outputs)
    }

    fn commands(outputs: &ServoOutputs) -> Vec<OutgoingCommand> {
        outputs.commands.try_iter().collect()
    }

    #[test]
    fn invalid_group_test() {
        let parameters = ServoParameters {
            move_group_name: "arm".to_string(),
            ..parameters()
        };
        let (publisher, _outputs) = ChannelPublisher::new(1);
        let result = ServoCalcs::new(parameters, &arm(), Box::new(NoSmoothing), Box::new(publisher));
        assert!(matches!(
            result,
            Err(ServoException::InvalidGroupException { .. })
        ));
        let parameters = ServoParameters {
            ee_frame_name: "tool0".to_string(),
            ..self::parameters()
        };
        let (publisher, _outputs) = ChannelPublisher::new(1);
        let result = ServoCalcs::new(parameters, &arm(), Box::new(NoSmoothing), Box::new(publisher));
        assert!(matches!(
            result,
            Err(ServoException::KinematicsException { .. })
        ));
    }

    #[test]
    fn waiting_publishes_only_status_test() {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish_command().times(0);
        publisher.expect_publish_condition().times(0);
        publisher
            .expect_publish_status()
            .withf(|status| *status == StatusCode::NoWarning)
            .times(3)
            .returning(|_| ());
        let arm = arm();
        let mut calcs =
            ServoCalcs::new(parameters(), &arm, Box::new(NoSmoothing), Box::new(publisher))
                .unwrap();
        let mut inputs = ServoInputs::new("base_link");
        for _ in 0..3 {
            calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        }
        assert!(calcs.is_waiting_for_commands());
    }

    #[test]
    fn joint_jog_moves_joints_test() {
        let arm = arm();
        let (mut calcs, outputs) = channel_calcs(parameters(), &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_joint_jog(JointJogCommand::new(&["joint2"], &[1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        assert!(!calcs.is_waiting_for_commands());
        let published = commands(&outputs);
        assert_eq!(published.len(), 1);
        match &published[0] {
            OutgoingCommand::Trajectory(trajectory) => {
                assert!(trajectory.stamp.is_none());
                assert_eq!(trajectory.joint_names, vec!["joint1", "joint2", "joint3"]);
                let point = &trajectory.points[0];
                // unitless: 1 * joint scale 0.5 * period 0.01
                assert!((point.positions[1] - (0.9 + 0.005)).abs() < 1e-12);
                assert_eq!(point.positions[0], 0.2);
                assert!((point.velocities[1] - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn nan_command_keeps_filter_warm_test() {
        let arm = arm();
        let resets = Arc::new(Mutex::new(Vec::new()));
        let filter = RecordingFilter {
            resets: resets.clone(),
        };
        let (publisher, outputs) = ChannelPublisher::new(100);
        let mut calcs =
            ServoCalcs::new(parameters(), &arm, Box::new(filter), Box::new(publisher)).unwrap();
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_twist(TwistCommand::new("base_link", [f64::NAN, 0.1, 0.], [0., 0., 0.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        resets.lock().unwrap().clear();
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        assert!(commands(&outputs).is_empty());
        let resets = resets.lock().unwrap();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0], vec![0.2, 0.9, 0.7]);
    }

    #[test]
    fn all_zero_commands_stop_publication_test() {
        let arm = arm();
        let parameters = ServoParameters {
            num_outgoing_halt_msgs_to_publish: 4,
            ..parameters()
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        for _ in 0..10 {
            inputs.receive_twist(TwistCommand::new("base_link", [0., 0., 0.], [0., 0., 0.]));
            calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        }
        let published = commands(&outputs);
        assert_eq!(published.len(), 5);
        for command in published {
            match command {
                OutgoingCommand::Trajectory(trajectory) => {
                    assert!(trajectory.points[0].velocities.iter().all(|v| *v == 0.));
                    assert_eq!(trajectory.points[0].positions, vec![0.2, 0.9, 0.7]);
                }
                other => panic!("unexpected command {:?}", other),
            }
        }
    }

    #[test]
    fn publishes_forever_with_zero_halt_messages_test() {
        let arm = arm();
        let parameters = ServoParameters {
            num_outgoing_halt_msgs_to_publish: 0,
            ..parameters()
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        for _ in 0..20 {
            inputs.receive_twist(TwistCommand::new("base_link", [0., 0., 0.], [0., 0., 0.]));
            calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        }
        assert_eq!(commands(&outputs).len(), 20);
    }

    #[test]
    fn stale_commands_are_not_published_test() {
        let arm = arm();
        let (mut calcs, outputs) = channel_calcs(parameters(), &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_joint_jog(JointJogCommand::new(&["joint1"], &[1.]));
        let latched = inputs.latch();
        let later = Instant::now() + Duration::from_secs(1);
        calcs.calculate_single_iteration(&arm, &latched, later);
        calcs.calculate_single_iteration(&arm, &latched, later);
        calcs.calculate_single_iteration(&arm, &latched, later);
        assert!(commands(&outputs).is_empty());
        assert_eq!(outputs.status.try_iter().count(), 3);
    }

    #[test]
    fn joint_bound_halts_test() {
        let arm = arm().with_positions(&[0.2, 1.95, 0.7]);
        let parameters = ServoParameters {
            halt_all_joints_in_joint_mode: false,
            ..parameters()
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_joint_jog(JointJogCommand::new(&["joint1", "joint2"], &[1., 1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        let statuses: Vec<StatusCode> = outputs.status.try_iter().collect();
        assert_eq!(statuses[0], StatusCode::NoWarning);
        assert_eq!(statuses[1], StatusCode::JointBound);
        match &commands(&outputs)[0] {
            OutgoingCommand::Trajectory(trajectory) => {
                let point = &trajectory.points[0];
                assert_eq!(point.positions[1], 1.95);
                assert_eq!(point.velocities[1], 0.);
                assert!(point.positions[0] > 0.2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn cartesian_command_publishes_condition_test() {
        let arm = arm();
        let parameters = ServoParameters {
            use_gazebo: true,
            ..parameters()
        };
        let parameters = ServoParameters {
            lower_singularity_threshold: 1e6,
            hard_stop_singularity_threshold: 1e7,
            ..parameters
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new(PLANAR_ARM_EE_FRAME);
        inputs.set_drift_dimensions(DimensionMask([false, false, true, true, true, false]));
        inputs.receive_twist(TwistCommand::new("", [0.2, 0., 0.], [0., 0., 0.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        let condition = outputs.condition.try_recv().unwrap();
        assert!(condition >= 1.);
        match &commands(&outputs)[0] {
            OutgoingCommand::Trajectory(trajectory) => assert_eq!(trajectory.points.len(), 30),
            other => panic!("unexpected command {:?}", other),
        }
        let ee = arm.global_link_transform(PLANAR_ARM_EE_FRAME).unwrap();
        let cached = calcs.frame_transforms().command_frame;
        assert!((cached.translation.vector - ee.translation.vector).norm() < 1e-12);
    }

    #[test]
    fn paused_and_status_reset_test() {
        let arm = arm();
        let (mut calcs, outputs) = channel_calcs(parameters(), &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.set_collision_velocity_scale(0.);
        inputs.receive_joint_jog(JointJogCommand::new(&["joint1"], &[1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        inputs.request_status_reset();
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        inputs.set_paused(true);
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        let statuses: Vec<StatusCode> = outputs.status.try_iter().collect();
        assert_eq!(
            statuses,
            vec![
                StatusCode::NoWarning,
                StatusCode::HaltForCollision,
                StatusCode::NoWarning,
                StatusCode::HaltForCollision,
                StatusCode::NoWarning
            ]
        );
        // three commands before pausing, all without motion
        let published = commands(&outputs);
        assert_eq!(published.len(), 3);
        if let OutgoingCommand::Trajectory(trajectory) = &published[1] {
            assert_eq!(trajectory.points[0].positions[0], 0.2);
        }
    }

    fn planar_drift() -> DimensionMask {
        DimensionMask([false, false, true, true, true, false])
    }

    fn first_point(command: &OutgoingCommand) -> (Vec<f64>, Vec<f64>) {
        match command {
            OutgoingCommand::Trajectory(trajectory) => (
                trajectory.points[0].positions.clone(),
                trajectory.points[0].velocities.clone(),
            ),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn joint_bound_halts_all_joints_by_default_test() {
        let arm = arm().with_positions(&[0.2, 1.95, 0.7]);
        let parameters = parameters();
        assert!(parameters.halt_all_joints_in_joint_mode);
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_joint_jog(JointJogCommand::new(
            &["joint1", "joint2", "joint3"],
            &[1., 1., -1.],
        ));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        let statuses: Vec<StatusCode> = outputs.status.try_iter().collect();
        assert_eq!(statuses, vec![StatusCode::NoWarning, StatusCode::JointBound]);
        let published = commands(&outputs);
        assert_eq!(published.len(), 2);
        for command in &published {
            let (positions, velocities) = first_point(command);
            assert_eq!(positions, vec![0.2, 1.95, 0.7]);
            assert_eq!(velocities, vec![0., 0., 0.]);
        }
    }

    #[test]
    fn cartesian_command_wins_over_joint_jog_test() {
        let arm = arm();
        let parameters = ServoParameters {
            lower_singularity_threshold: 1e6,
            hard_stop_singularity_threshold: 1e7,
            ..parameters()
        };
        let twist = TwistCommand::new("base_link", [0.3, -0.2, 0.], [0., 0., 0.]);

        let (mut both, both_outputs) = channel_calcs(parameters.clone(), &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.set_drift_dimensions(planar_drift());
        inputs.receive_joint_jog(JointJogCommand::new(&["joint1"], &[1.]));
        inputs.receive_twist(twist.clone());
        both.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());

        let (mut cartesian, cartesian_outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.set_drift_dimensions(planar_drift());
        inputs.receive_twist(twist);
        cartesian.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());

        assert_eq!(both_outputs.condition.try_iter().count(), 1);
        let both_commands = commands(&both_outputs);
        assert_eq!(both_commands.len(), 1);
        assert_eq!(both_commands, commands(&cartesian_outputs));
        let (positions, _) = first_point(&both_commands[0]);
        // a jog of joint1 alone would leave joint3 untouched
        assert!((positions[2] - 0.7).abs() > 1e-6);
    }

    fn expect_statuses(publisher: &mut MockPublisher, statuses: Vec<StatusCode>) {
        let mut sequence = Sequence::new();
        for expected in statuses {
            publisher
                .expect_publish_status()
                .withf(move |status| *status == expected)
                .times(1)
                .in_sequence(&mut sequence)
                .returning(|_| ());
        }
    }

    #[test]
    fn collision_scale_decelerates_test() {
        let mut publisher = MockPublisher::new();
        expect_statuses(
            &mut publisher,
            vec![StatusCode::NoWarning, StatusCode::DecelerateForCollision],
        );
        publisher.expect_publish_condition().times(0);
        // 1 * joint scale 0.5 * period 0.01 * collision scale 0.5
        publisher
            .expect_publish_command()
            .withf(|command| match command {
                OutgoingCommand::Trajectory(trajectory) => {
                    let point = &trajectory.points[0];
                    point.positions[0] == 0.2
                        && (point.positions[1] - (0.9 + 0.0025)).abs() < 1e-12
                        && (point.velocities[1] - 0.25).abs() < 1e-9
                }
                _ => false,
            })
            .times(2)
            .returning(|_| ());
        let arm = arm();
        let mut calcs =
            ServoCalcs::new(parameters(), &arm, Box::new(NoSmoothing), Box::new(publisher))
                .unwrap();
        let mut inputs = ServoInputs::new("base_link");
        inputs.set_collision_velocity_scale(0.5);
        inputs.receive_joint_jog(JointJogCommand::new(&["joint2"], &[1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
    }

    #[test]
    fn most_severe_status_is_published_test() {
        let mut publisher = MockPublisher::new();
        expect_statuses(
            &mut publisher,
            vec![StatusCode::NoWarning, StatusCode::JointBound],
        );
        publisher.expect_publish_command().times(2).returning(|_| ());
        let arm = arm().with_positions(&[0.2, 1.95, 0.7]);
        let mut calcs =
            ServoCalcs::new(parameters(), &arm, Box::new(NoSmoothing), Box::new(publisher))
                .unwrap();
        let mut inputs = ServoInputs::new("base_link");
        // decelerating for a collision and halting at a joint bound in the same cycle
        inputs.set_collision_velocity_scale(0.5);
        inputs.receive_joint_jog(JointJogCommand::new(&["joint2"], &[1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
    }

    /// Runs two Cartesian cycles and returns the status of the first one and its command.
    fn singular_cycle(linear: [f64; 3]) -> (StatusCode, OutgoingCommand) {
        let arm = arm();
        // every condition number is above both thresholds
        let parameters = ServoParameters {
            lower_singularity_threshold: 0.5,
            hard_stop_singularity_threshold: 0.9,
            ..parameters()
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.set_drift_dimensions(planar_drift());
        inputs.set_collision_velocity_scale(0.5);
        inputs.receive_twist(TwistCommand::new("base_link", linear, [0., 0., 0.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        let statuses: Vec<StatusCode> = outputs.status.try_iter().collect();
        (statuses[1], commands(&outputs).remove(0))
    }

    #[test]
    fn halt_for_singularity_test() {
        let (forward_status, forward_command) = singular_cycle([0.3, 0., 0.]);
        let (backward_status, backward_command) = singular_cycle([-0.3, 0., 0.]);
        // exactly one of the two directions leads towards the singularity
        let (halted, halted_command, moving, moving_command) =
            if forward_status == StatusCode::HaltForSingularity {
                (forward_status, forward_command, backward_status, backward_command)
            } else {
                (backward_status, backward_command, forward_status, forward_command)
            };
        assert_eq!(halted, StatusCode::HaltForSingularity);
        // the collision deceleration of the same cycle is less severe
        assert_eq!(moving, StatusCode::DecelerateForCollision);
        let (positions, velocities) = first_point(&halted_command);
        assert_eq!(positions, vec![0.2, 0.9, 0.7]);
        assert!(velocities.iter().all(|v| *v == 0.));
        let (positions, _) = first_point(&moving_command);
        assert_ne!(positions, vec![0.2, 0.9, 0.7]);
    }

    #[test]
    fn multi_array_output_test() {
        let arm = arm();
        let parameters = ServoParameters {
            command_out_type: CommandOutType::Float64MultiArray,
            ..parameters()
        };
        let (mut calcs, outputs) = channel_calcs(parameters.clone(), &arm);
        let mut inputs = ServoInputs::new("base_link");
        inputs.receive_joint_jog(JointJogCommand::new(&["joint2"], &[1.]));
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        match &commands(&outputs)[0] {
            OutgoingCommand::MultiArray(positions) => {
                assert_eq!(positions.len(), 3);
                assert_eq!(positions[0], 0.2);
                assert!((positions[1] - 0.905).abs() < 1e-12);
                assert_eq!(positions[2], 0.7);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let parameters = ServoParameters {
            publish_joint_positions: false,
            publish_joint_velocities: true,
            ..parameters
        };
        let (mut calcs, outputs) = channel_calcs(parameters, &arm);
        calcs.calculate_single_iteration(&arm, &inputs.latch(), Instant::now());
        match &commands(&outputs)[0] {
            OutgoingCommand::MultiArray(velocities) => {
                assert_eq!(velocities.len(), 3);
                assert_eq!(velocities[0], 0.);
                assert!((velocities[1] - 0.5).abs() < 1e-9);
                assert_eq!(velocities[2], 0.);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
