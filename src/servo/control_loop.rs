// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`Servo`], which runs the servo cycle on its own thread.
use crate::exception::{ServoException, ServoResult};
use crate::model::StateMonitor;
use crate::servo::command::{DimensionMask, JointJogCommand, TwistCommand, VelocityCommand};
use crate::servo::control_tools::setup_servo_thread;
use crate::servo::frame_transforms::FrameTransforms;
use crate::servo::ingress::{CycleInputs, ServoInputs};
use crate::servo::low_pass_filter::{create_smoothing_filter, SmoothingFilter};
use crate::servo::output::ServoPublisher;
use crate::servo::parameters::ServoParameters;
use crate::servo::servo_calcs::ServoCalcs;
use crate::utils::LogThrottle;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use nalgebra::Isometry3;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Changes of parameters while the servo is running.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterUpdate {
    /// Frame in which twists without frame id are interpreted.
    RobotLinkCommandFrame(String),
}

/// State of a [`Servo`] as seen from outside.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServoState {
    /// No stamped command was received so far.
    WaitingForCommands,
    Paused,
    Active,
    /// The servo thread was stopped.
    Stopped,
}

impl fmt::Display for ServoState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
struct SharedState {
    inputs: ServoInputs,
    transforms: Option<FrameTransforms>,
    waiting_for_commands: bool,
}

type Shared = Arc<(Mutex<SharedState>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<SharedState> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streams joint commands computed from velocity commands.
///
/// All methods can be called from any thread. Commands are latched, the servo thread picks up
/// the latest command of each kind once per cycle (or as soon as it arrives in low-latency mode).
///
/// # Example
/// ```no_run
/// use servo::{ChannelPublisher, PlanarArmMonitor, PlanarArmState, Servo, ServoParameters, TwistCommand};
/// use std::sync::Arc;
/// # fn main() -> servo::ServoResult<()> {
/// let monitor = Arc::new(PlanarArmMonitor::new(PlanarArmState::new(&[1., 1.], Default::default())));
/// let parameters = ServoParameters {
///     move_group_name: "planar_arm".to_string(),
///     ..Default::default()
/// };
/// let (publisher, outputs) = ChannelPublisher::new(10);
/// let mut servo = Servo::new(parameters, monitor, Box::new(publisher))?;
/// servo.start()?;
/// servo.twist_command(TwistCommand::new("", [0.1, 0., 0.], [0., 0., 0.]));
/// let command = outputs.commands.recv();
/// servo.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct Servo<M: StateMonitor> {
    parameters: ServoParameters,
    monitor: Arc<M>,
    shared: Shared,
    stop_requested: Arc<AtomicBool>,
    parameter_sender: Sender<ParameterUpdate>,
    parameter_receiver: Receiver<ParameterUpdate>,
    calcs: Option<ServoCalcs>,
    worker: Option<JoinHandle<()>>,
}

impl<M: StateMonitor> Servo<M> {
    /// Creates a servo with the smoothing filter named in `parameters`.
    ///
    /// # Errors
    /// * ConfigurationException if the parameters are invalid.
    /// * SmoothingPluginException if the smoothing filter is unknown.
    /// * InvalidGroupException or KinematicsException if the model does not match the parameters.
    pub fn new(
        parameters: ServoParameters,
        monitor: Arc<M>,
        publisher: Box<dyn ServoPublisher>,
    ) -> ServoResult<Self> {
        parameters.validate()?;
        let smoother = create_smoothing_filter(&parameters)?;
        Servo::with_smoothing_filter(parameters, monitor, smoother, publisher)
    }

    /// Creates a servo with a custom smoothing filter.
    ///
    /// # Errors
    /// see [`new`](`Self::new`)
    pub fn with_smoothing_filter(
        parameters: ServoParameters,
        monitor: Arc<M>,
        smoother: Box<dyn SmoothingFilter>,
        publisher: Box<dyn ServoPublisher>,
    ) -> ServoResult<Self> {
        parameters.validate()?;
        let calcs = ServoCalcs::new(
            parameters.clone(),
            &monitor.current_state(),
            smoother,
            publisher,
        )?;
        let shared = SharedState {
            inputs: ServoInputs::new(&parameters.robot_link_command_frame),
            transforms: Some(calcs.frame_transforms()),
            waiting_for_commands: true,
        };
        let (parameter_sender, parameter_receiver) = unbounded();
        Ok(Servo {
            parameters,
            monitor,
            shared: Arc::new((Mutex::new(shared), Condvar::new())),
            stop_requested: Arc::new(AtomicBool::new(false)),
            parameter_sender,
            parameter_receiver,
            calcs: Some(calcs),
            worker: None,
        })
    }

    pub fn parameters(&self) -> &ServoParameters {
        &self.parameters
    }

    /// Spawns the servo thread.
    ///
    /// # Errors
    /// * ThreadException if the servo was started before or the thread cannot be spawned.
    /// * RealTimeException if real-time scheduling is enforced but cannot be set up.
    pub fn start(&mut self) -> ServoResult<()> {
        let calcs = self.calcs.take().ok_or_else(|| ServoException::ThreadException {
            message: "the servo can only be started once".to_string(),
        })?;
        let (startup_sender, startup_receiver) = bounded(1);
        let worker = ServoWorker {
            calcs,
            monitor: self.monitor.clone(),
            shared: self.shared.clone(),
            stop_requested: self.stop_requested.clone(),
            parameter_updates: self.parameter_receiver.clone(),
            period: Duration::from_secs_f64(self.parameters.publish_period),
            low_latency_mode: self.parameters.low_latency_mode,
            throttle: LogThrottle::default(),
        };
        let realtime_config = self.parameters.realtime_config;
        let handle = std::thread::Builder::new()
            .name("servo".to_string())
            .spawn(move || {
                let setup = setup_servo_thread(realtime_config);
                let ready = setup.is_ok();
                // the receiver only disappears if start() is gone
                let _ = startup_sender.send(setup);
                if ready {
                    worker.run();
                }
            })
            .map_err(|e| ServoException::ThreadException {
                message: e.to_string(),
            })?;
        let setup = startup_receiver
            .recv()
            .map_err(|e| ServoException::ThreadException {
                message: e.to_string(),
            })
            .and_then(|setup| setup);
        if let Err(error) = setup {
            self.stop_requested.store(true, Ordering::SeqCst);
            let _ = handle.join();
            return Err(error);
        }
        info!("servo started for group {}", self.parameters.move_group_name);
        self.worker = Some(handle);
        Ok(())
    }

    /// Stops the servo thread. The running cycle is completed first.
    ///
    /// # Errors
    /// * ThreadException if the servo thread panicked.
    pub fn stop(&mut self) -> ServoResult<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        {
            let mut shared = lock(&self.shared);
            shared.inputs.clear_new_input();
            self.shared.1.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| ServoException::ThreadException {
                message: "the servo thread panicked".to_string(),
            })?;
            info!("servo stopped");
        }
        Ok(())
    }

    fn notify_new_input(&self) {
        if self.parameters.low_latency_mode {
            self.shared.1.notify_all();
        }
    }

    /// Latches a twist command.
    pub fn twist_command(&self, command: TwistCommand) {
        let mut shared = lock(&self.shared);
        shared.inputs.receive_twist(command);
        self.notify_new_input();
    }

    /// Latches a joint jog command.
    pub fn joint_command(&self, command: JointJogCommand) {
        let mut shared = lock(&self.shared);
        shared.inputs.receive_joint_jog(command);
        self.notify_new_input();
    }

    pub fn submit_command(&self, command: VelocityCommand) {
        match command {
            VelocityCommand::Twist(twist) => self.twist_command(twist),
            VelocityCommand::JointJog(jog) => self.joint_command(jog),
        }
    }

    /// Sets the factor by which the motion is slowed down because of nearby obstacles.
    ///
    /// Values are clamped to \[0, 1\]. Returns false and ignores the value if it is NaN.
    pub fn set_collision_velocity_scale(&self, scale: f64) -> bool {
        let accepted = lock(&self.shared).inputs.set_collision_velocity_scale(scale);
        if !accepted {
            warn!("Ignoring NaN collision velocity scale");
        }
        accepted
    }

    /// Sets the Cartesian dimensions which may drift to reach the commanded motion.
    pub fn change_drift_dimensions(&self, drift_dimensions: DimensionMask) {
        lock(&self.shared)
            .inputs
            .set_drift_dimensions(drift_dimensions);
    }

    /// Sets the Cartesian dimensions of incoming twists which are obeyed.
    pub fn change_control_dimensions(&self, control_dimensions: DimensionMask) {
        lock(&self.shared)
            .inputs
            .set_control_dimensions(control_dimensions);
    }

    /// The next published status is `NoWarning`.
    pub fn reset_servo_status(&self) {
        lock(&self.shared).inputs.request_status_reset();
    }

    pub fn set_paused(&self, paused: bool) {
        lock(&self.shared).inputs.set_paused(paused);
        debug!("servo paused: {}", paused);
    }

    /// Returns a sender for parameter changes. Changes take effect at the start of the next
    /// cycle.
    pub fn parameter_sender(&self) -> Sender<ParameterUpdate> {
        self.parameter_sender.clone()
    }

    /// Changes the frame in which twists without frame id are interpreted.
    pub fn set_command_frame(&self, frame: &str) {
        // the receiver lives as long as self
        let _ = self
            .parameter_sender
            .send(ParameterUpdate::RobotLinkCommandFrame(frame.to_string()));
    }

    /// Transform from the planning frame to the command frame. None until computed.
    pub fn command_frame_transform(&self) -> Option<Isometry3<f64>> {
        lock(&self.shared)
            .transforms
            .map(|transforms| transforms.command_frame)
    }

    /// Transform from the planning frame to the end-effector frame. None until computed.
    pub fn ee_frame_transform(&self) -> Option<Isometry3<f64>> {
        lock(&self.shared)
            .transforms
            .map(|transforms| transforms.ee_frame)
    }

    pub fn state(&self) -> ServoState {
        if self.stop_requested.load(Ordering::SeqCst) {
            return ServoState::Stopped;
        }
        let shared = lock(&self.shared);
        if shared.inputs.is_paused() {
            ServoState::Paused
        } else if shared.waiting_for_commands {
            ServoState::WaitingForCommands
        } else {
            ServoState::Active
        }
    }
}

impl<M: StateMonitor> Drop for Servo<M> {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            error!("{}", error);
        }
    }
}

/// Everything the servo thread owns.
struct ServoWorker<M: StateMonitor> {
    calcs: ServoCalcs,
    monitor: Arc<M>,
    shared: Shared,
    stop_requested: Arc<AtomicBool>,
    parameter_updates: Receiver<ParameterUpdate>,
    period: Duration,
    low_latency_mode: bool,
    throttle: LogThrottle,
}

impl<M: StateMonitor> ServoWorker<M> {
    fn stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        let mut next_tick = Instant::now();
        while !self.stopped() {
            let tick_start = Instant::now();
            let inputs = match self.latch_inputs() {
                Some(inputs) => inputs,
                None => break,
            };
            let state = self.monitor.current_state();
            self.calcs
                .calculate_single_iteration(&state, &inputs, Instant::now());
            {
                let mut shared = lock(&self.shared);
                shared.transforms = Some(self.calcs.frame_transforms());
                shared.waiting_for_commands = self.calcs.is_waiting_for_commands();
            }

            let run_time = tick_start.elapsed();
            if run_time > self.period && self.throttle.ready("overrun") {
                warn!(
                    "The servo cycle took {:.4} s, longer than the period of {:.4} s",
                    run_time.as_secs_f64(),
                    self.period.as_secs_f64()
                );
            }
            if !self.low_latency_mode {
                next_tick += self.period;
                self.sleep_until(next_tick);
                // do not try to catch up on missed cycles
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now;
                }
            }
        }
        debug!("servo thread finished");
    }

    /// Waits for new input in low-latency mode and takes the snapshot for this cycle. Returns
    /// None if the servo is stopped.
    fn latch_inputs(&self) -> Option<CycleInputs> {
        let mut shared = lock(&self.shared);
        if self.low_latency_mode {
            let stop_requested = self.stop_requested.clone();
            shared = self
                .shared
                .1
                .wait_while(shared, |state| {
                    !state.inputs.has_new_input() && !stop_requested.load(Ordering::SeqCst)
                })
                .unwrap_or_else(PoisonError::into_inner);
            if self.stopped() {
                return None;
            }
        }
        for update in self.parameter_updates.try_iter() {
            match update {
                ParameterUpdate::RobotLinkCommandFrame(frame) => {
                    info!("command frame changed to {}", frame);
                    shared.inputs.set_command_frame(&frame);
                }
            }
        }
        shared.inputs.clear_new_input();
        Some(shared.inputs.latch())
    }

    /// Sleeps without holding the lock. A stop request ends the sleep early.
    fn sleep_until(&self, deadline: Instant) {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return;
        }
        let shared = lock(&self.shared);
        let stop_requested = &self.stop_requested;
        let _ = self
            .shared
            .1
            .wait_timeout_while(shared, timeout, |_| !stop_requested.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use crate::model::planar_arm::{
        PlanarArmMonitor, PlanarArmState, PLANAR_ARM_EE_FRAME, PLANAR_ARM_GROUP,
    };
    use crate::model::{KinematicState, StateMonitor, VariableBounds};
    use crate::servo::command::{JointJogCommand, VelocityCommand};
    use crate::servo::control_loop::{ParameterUpdate, Servo, ServoState};
    use crate::servo::control_tools::has_realtime_kernel;
    use crate::servo::output::{ChannelPublisher, OutgoingCommand, ServoOutputs};
    use crate::servo::parameters::{RealtimeConfig, ServoParameters};
    use crate::exception::ServoException;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn monitor() -> Arc<PlanarArmMonitor> {
        let bounds = VariableBounds {
            position: Some((-3., 3.)),
            max_velocity: Some(2.),
            max_acceleration: None,
        };
        Arc::new(PlanarArmMonitor::new(
            PlanarArmState::new(&[1., 0.7], bounds).with_positions(&[0.3, 0.8]),
        ))
    }

    fn parameters() -> ServoParameters {
        ServoParameters {
            move_group_name: PLANAR_ARM_GROUP.to_string(),
            publish_period: 0.005,
            incoming_command_timeout: 1.,
            ..Default::default()
        }
    }

    fn servo(parameters: ServoParameters) -> (Servo<PlanarArmMonitor>, ServoOutputs) {
        let (publisher, outputs) = ChannelPublisher::new(1000);
        let servo = Servo::new(parameters, monitor(), Box::new(publisher)).unwrap();
        (servo, outputs)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn rate_mode_publishes_jog_test() {
        let (mut servo, outputs) = servo(parameters());
        assert!(servo.command_frame_transform().is_some());
        servo.start().unwrap();
        assert_eq!(servo.state(), ServoState::WaitingForCommands);
        assert!(outputs.status.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(outputs.commands.try_recv().is_err());

        servo.submit_command(VelocityCommand::from(JointJogCommand::new(&["joint1"], &[1.])));
        let command = outputs
            .commands
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        match command {
            OutgoingCommand::Trajectory(trajectory) => {
                assert!(trajectory.points[0].positions[0] > 0.3);
                assert!(trajectory.points[0].velocities[0] > 0.);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(wait_for(|| servo.state() == ServoState::Active));
        servo.set_paused(true);
        assert_eq!(servo.state(), ServoState::Paused);
        servo.stop().unwrap();
        assert_eq!(servo.state(), ServoState::Stopped);
        assert!(servo.start().is_err());
    }

    #[test]
    fn low_latency_mode_waits_for_commands_test() {
        let parameters = ServoParameters {
            low_latency_mode: true,
            ..parameters()
        };
        let (mut servo, outputs) = servo(parameters);
        servo.start().unwrap();
        assert!(outputs
            .status
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        servo.joint_command(JointJogCommand::new(&["joint2"], &[-1.]));
        assert!(outputs
            .commands
            .recv_timeout(Duration::from_secs(5))
            .is_ok());
        assert_eq!(outputs.status.try_iter().count(), 1);
        // a blocked servo thread must still stop
        servo.stop().unwrap();
    }

    #[test]
    fn command_frame_update_test() {
        let (mut servo, _outputs) = servo(parameters());
        let ee = monitor()
            .current_state()
            .global_link_transform(PLANAR_ARM_EE_FRAME)
            .unwrap();
        assert!(
            (servo.ee_frame_transform().unwrap().translation.vector - ee.translation.vector).norm()
                < 1e-12
        );
        servo.start().unwrap();
        servo
            .parameter_sender()
            .send(ParameterUpdate::RobotLinkCommandFrame(
                PLANAR_ARM_EE_FRAME.to_string(),
            ))
            .unwrap();
        assert!(wait_for(|| {
            let command_frame = servo.command_frame_transform().unwrap();
            (command_frame.translation.vector - ee.translation.vector).norm() < 1e-12
        }));
        servo.set_command_frame("base_link");
        assert!(wait_for(|| {
            servo.command_frame_transform().unwrap().translation.vector.norm() < 1e-12
        }));
        servo.stop().unwrap();
    }

    #[test]
    fn collision_scale_is_validated_test() {
        let (servo, _outputs) = servo(parameters());
        assert!(!servo.set_collision_velocity_scale(f64::NAN));
        assert!(servo.set_collision_velocity_scale(0.5));
    }

    #[test]
    fn invalid_configuration_test() {
        let (publisher, _outputs) = ChannelPublisher::new(1);
        let parameters = ServoParameters {
            smoothing_filter_plugin_name: "butterworth".to_string(),
            ..parameters()
        };
        assert!(matches!(
            Servo::new(parameters, monitor(), Box::new(publisher)),
            Err(ServoException::SmoothingPluginException { .. })
        ));
        if !has_realtime_kernel() {
            let parameters = ServoParameters {
                realtime_config: RealtimeConfig::Enforce,
                ..self::parameters()
            };
            let (mut servo, _outputs) = servo(parameters);
            assert!(matches!(
                servo.start(),
                Err(ServoException::RealTimeException { .. })
            ));
        }
    }
}
