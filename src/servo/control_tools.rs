// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Real-time setup of the servo thread.
use crate::exception::{ServoException, ServoResult};
use crate::servo::parameters::RealtimeConfig;
use std::path::Path;
use tracing::{info, warn};

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Sets the current thread to the highest possible scheduler priority.
///
/// # Errors
/// * RealTimeException if realtime priority cannot be set for the current thread.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///servo            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> ServoResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(ServoException::RealTimeException {
                message: "unable to get maximum possible thread priority".to_string(),
            });
        }
        let thread_param = libc::sched_param {
            // one below the maximum, the kernel threads keep the top priority
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(ServoException::RealTimeException {
                message: "unable to set realtime scheduling".to_string(),
            });
        }
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(ServoException::RealTimeException {
                message: "unable to lock memory".to_string(),
            });
        }
    }
    Ok(())
}

/// Prepares the calling thread according to `realtime_config`.
///
/// With [`RealtimeConfig::Ignore`] a failure to raise the priority is only logged.
///
/// # Errors
/// * RealTimeException if real-time scheduling is enforced but not available.
pub fn setup_servo_thread(realtime_config: RealtimeConfig) -> ServoResult<()> {
    match realtime_config {
        RealtimeConfig::Enforce => {
            if !has_realtime_kernel() {
                return Err(ServoException::RealTimeException {
                    message: "Running kernel does not have realtime capabilities.".to_string(),
                });
            }
            set_current_thread_to_highest_scheduler_priority()?;
            info!("servo thread runs with realtime priority");
            Ok(())
        }
        RealtimeConfig::Ignore => {
            if has_realtime_kernel() {
                if let Err(error) = set_current_thread_to_highest_scheduler_priority() {
                    warn!("{}", error);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::servo::control_tools::{has_realtime_kernel, setup_servo_thread};
    use crate::servo::parameters::RealtimeConfig;

    #[test]
    fn ignore_never_fails_test() {
        assert!(setup_servo_thread(RealtimeConfig::Ignore).is_ok());
    }

    #[test]
    fn enforce_without_realtime_kernel_fails_test() {
        if !has_realtime_kernel() {
            assert!(setup_servo_thread(RealtimeConfig::Enforce).is_err());
        }
    }
}
