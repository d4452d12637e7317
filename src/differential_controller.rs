use serde::{Deserialize, Serialize};

use crate::configuration::BaseConfig;
use crate::messages::VelocityCommand;

/// Wheel speed pair in millimeters per second, positive forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelSpeedCommand {
    pub left_mm_s: i32,
    pub right_mm_s: i32,
}

impl WheelSpeedCommand {
    /// Split a body twist into wheel speeds.
    ///
    /// Each wheel gets the linear speed plus the share of the angular rate
    /// acting across half the axle. A base mounted with the drive unit
    /// facing backwards swaps the pair and flips the signs.
    pub fn from_velocity(command: &VelocityCommand, config: &BaseConfig) -> Self {
        let half_axle_m = config.axle_distance_m() / 2.0;
        let left_m_s = command.linear - half_axle_m * command.angular;
        let right_m_s = command.linear + half_axle_m * command.angular;
        let speeds = WheelSpeedCommand {
            left_mm_s: (left_m_s * 1000.0) as i32,
            right_mm_s: (right_m_s * 1000.0) as i32,
        };
        if config.backwards {
            speeds.reversed()
        } else {
            speeds
        }
    }

    fn reversed(&self) -> Self {
        WheelSpeedCommand {
            left_mm_s: -self.right_mm_s,
            right_mm_s: -self.left_mm_s,
        }
    }

    pub fn stopped() -> Self {
        WheelSpeedCommand::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.left_mm_s == 0 && self.right_mm_s == 0
    }

    /// Copy with both wheels limited to the symmetric range around zero.
    pub fn clamped_to(&self, max_mm_s: i32) -> Self {
        WheelSpeedCommand {
            left_mm_s: self.left_mm_s.clamp(-max_mm_s, max_mm_s),
            right_mm_s: self.right_mm_s.clamp(-max_mm_s, max_mm_s),
        }
    }
}
