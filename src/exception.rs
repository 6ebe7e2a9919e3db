// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while setting up the servo or smoothing a
/// trajectory.
///
/// Errors which occur while servoing are never returned. They are logged and the robot is halted
/// instead.
#[derive(Error, Debug)]
pub enum ServoException {
    /// ConfigurationException is thrown if a parameter has an invalid value.
    #[error("{message:?}")]
    ConfigurationException { message: String },

    /// ParameterLoadException is thrown if a parameter file cannot be read or parsed.
    #[error("Cannot load the parameters: {message:?}")]
    ParameterLoadException { message: String },

    /// InvalidGroupException is thrown if the kinematic model does not know the joint group.
    #[error("Invalid move group name: `{group}`")]
    InvalidGroupException { group: String },

    /// SmoothingPluginException is thrown if the smoothing filter cannot be created or
    /// initialized.
    #[error("{message:?}")]
    SmoothingPluginException { message: String },

    /// RealTimeException is thrown if the real-time priority cannot be set
    #[error("{message:?}")]
    RealTimeException { message: String },

    /// ThreadException is thrown if the servo thread cannot be spawned or joined.
    #[error("{message:?}")]
    ThreadException { message: String },

    /// KinematicsException is thrown if the kinematic model cannot answer a query, e.g. for an
    /// unknown frame.
    #[error("{message:?}")]
    KinematicsException { message: String },

    /// SmoothingException is thrown if a trajectory cannot be smoothed.
    #[error("{message:?}")]
    SmoothingException { message: String },
}

/// creates a ConfigurationException from a string slice
pub(crate) fn create_configuration_exception(message: &str) -> ServoException {
    ServoException::ConfigurationException {
        message: message.to_string(),
    }
}

/// creates a SmoothingException from a string slice
pub(crate) fn create_smoothing_exception(message: &str) -> ServoException {
    ServoException::SmoothingException {
        message: message.to_string(),
    }
}

/// Result type which can have ServoException as Error
pub type ServoResult<T> = Result<T, ServoException>;
