use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::*;
use zenoh::value::Value;

use crate::odometry::{Pose2d, VelocityEstimate};

pub const SENSOR_FRAME_TOPIC: &str = "bumble/sensor_frame";
pub const VELOCITY_COMMAND_TOPIC: &str = "bumble/cmd_vel";
pub const MODE_COMMAND_TOPIC: &str = "bumble/command";
pub const ODOMETRY_TOPIC: &str = "bumble/odom";
pub const WHEEL_SPEEDS_TOPIC: &str = "bumble/base/wheel_speeds";
pub const MODE_REQUEST_TOPIC: &str = "bumble/base/mode";
pub const STREAM_START_TOPIC: &str = "bumble/base/stream_start";
pub const DISPLAY_TOPIC: &str = "bumble/base/display";

/// Text payload of a subscriber sample. Anything that is not UTF8 text is
/// logged and discarded, it must never take the event loop down.
pub fn text_payload(value: Value, topic: &str) -> Option<String> {
    match String::try_from(value) {
        Ok(text) => Some(text),
        Err(error) => {
            warn!("Discarding non text payload on {}: {}", topic, error);
            None
        }
    }
}

/// JSON payload of a subscriber sample, decoded into the target message.
/// Malformed messages are logged and discarded.
pub fn json_payload<T: DeserializeOwned>(value: Value, topic: &str) -> Option<T> {
    let text = text_payload(value, topic)?;
    match serde_json::from_str(&text) {
        Ok(message) => Some(message),
        Err(error) => {
            warn!("Discarding malformed message on {}: {}", topic, error);
            None
        }
    }
}

/// Open interface mode reported by the base.
///
/// `Passive` accepts sensor queries only. Actuators unlock in `Safe`, which
/// still keeps the cliff and wheel drop reflexes armed. `Full` hands those
/// over to us as well.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    Off,
    Passive,
    Safe,
    Full,
}

/// One sample of the sensor stream relayed from the base.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SensorFrame {
    pub time: DateTime<Utc>,
    /// cumulative left wheel encoder count, wraps at the i16 boundary
    pub left_encoder: i16,
    /// cumulative right wheel encoder count, wraps at the i16 boundary
    pub right_encoder: i16,
    pub mode: RobotMode,
    pub battery_charge_mah: u16,
    pub battery_capacity_mah: u16,
}

impl SensorFrame {
    /// Charge as a whole percentage. None when the battery reports no
    /// capacity, which happens while the charger is negotiating.
    pub fn battery_percentage(&self) -> Option<i32> {
        if self.battery_capacity_mah == 0 {
            return None;
        }
        let ratio = f64::from(self.battery_charge_mah) / f64::from(self.battery_capacity_mah);
        Some((ratio * 100.0).round() as i32)
    }
}

/// Desired base motion. `linear` is meters per second along the heading,
/// `angular` is radians per second with counterclockwise positive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct VelocityCommand {
    pub linear: f64,
    pub angular: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OdometryMessage {
    pub time: DateTime<Utc>,
    pub pose: Pose2d,
    pub twist: VelocityEstimate,
}

/// Mode transitions the base accepts over its command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCommand {
    Start,
    Stop,
    Reset,
    PowerDown,
    Safe,
    Full,
}

impl ModeCommand {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "start" => Some(ModeCommand::Start),
            "stop" => Some(ModeCommand::Stop),
            "reset" => Some(ModeCommand::Reset),
            "powerdown" => Some(ModeCommand::PowerDown),
            "safe" => Some(ModeCommand::Safe),
            "full" => Some(ModeCommand::Full),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            ModeCommand::Start => "start",
            ModeCommand::Stop => "stop",
            ModeCommand::Reset => "reset",
            ModeCommand::PowerDown => "powerdown",
            ModeCommand::Safe => "safe",
            ModeCommand::Full => "full",
        }
    }
}
