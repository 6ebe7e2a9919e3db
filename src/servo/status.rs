// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
//! Defines the status codes which are published by the servo every cycle.
use std::fmt::{Debug, Display, Formatter, Result};

use num_derive::{FromPrimitive, ToPrimitive};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Condition of the servo during the last cycle.
///
/// Serialized as its numeric code.
#[derive(Serialize_repr, Deserialize_repr, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(i8)]
#[derive(FromPrimitive, ToPrimitive)]
pub enum StatusCode {
    Invalid = -1,
    /// Nothing limited the motion.
    NoWarning = 0,
    /// Moving towards a singularity, the motion is slowed down.
    DecelerateForSingularity = 1,
    /// Very close to a singularity, the motion is stopped.
    HaltForSingularity = 2,
    /// An obstacle is close, the motion is slowed down.
    DecelerateForCollision = 3,
    /// An obstacle is very close, the motion is stopped.
    HaltForCollision = 4,
    /// At least one joint is close to a position limit and was halted.
    JointBound = 5,
}

impl StatusCode {
    /// Position in the severity order. A higher value is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            StatusCode::Invalid | StatusCode::NoWarning => 0,
            StatusCode::DecelerateForSingularity => 1,
            StatusCode::DecelerateForCollision => 2,
            StatusCode::JointBound => 3,
            StatusCode::HaltForSingularity => 4,
            StatusCode::HaltForCollision => 5,
        }
    }

    /// Returns the more severe of the two codes. On equal severity `self` is kept.
    pub fn escalate(self, other: StatusCode) -> StatusCode {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::NoWarning
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            StatusCode::Invalid => write!(f, "Invalid"),
            StatusCode::NoWarning => write!(f, "No warnings"),
            StatusCode::DecelerateForSingularity => {
                write!(f, "Moving closer to a singularity, decelerating")
            }
            StatusCode::HaltForSingularity => write!(f, "Very close to a singularity, emergency stop"),
            StatusCode::DecelerateForCollision => write!(f, "Close to a collision, decelerating"),
            StatusCode::HaltForCollision => write!(f, "Collision detected, emergency stop"),
            StatusCode::JointBound => write!(f, "Close to a joint bound (position or velocity), halting"),
        }
    }
}
