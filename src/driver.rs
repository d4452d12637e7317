use async_trait::async_trait;
use std::sync::Arc;
use tracing::*;
use zenoh::{prelude::r#async::*, publication::Publisher, Session, SessionDeclarations};

use crate::differential_controller::WheelSpeedCommand;
use crate::error::ErrorWrapper;
use crate::messages::{
    ModeCommand, DISPLAY_TOPIC, MODE_REQUEST_TOPIC, STREAM_START_TOPIC, WHEEL_SPEEDS_TOPIC,
};

/// Command side of the base.
///
/// The controller only talks to the hardware through this trait so tests can
/// swap in a recording fake.
#[async_trait]
pub trait RobotLink: Send + Sync {
    async fn send_wheel_speeds(&mut self, speeds: WheelSpeedCommand) -> anyhow::Result<()>;
    async fn request_mode(&mut self, mode: ModeCommand) -> anyhow::Result<()>;
    async fn start_sensor_stream(&mut self) -> anyhow::Result<()>;
    /// Write up to four characters to the seven segment display.
    async fn set_display(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Publishes base commands for the hardware bridge that owns the serial port.
pub struct ZenohRobotLink {
    wheel_speeds: Publisher<'static>,
    mode_requests: Publisher<'static>,
    stream_start: Publisher<'static>,
    display: Publisher<'static>,
    max_wheel_speed_mm_s: i32,
}

impl ZenohRobotLink {
    pub async fn new(session: Arc<Session>, max_wheel_speed_mm_s: i32) -> anyhow::Result<Self> {
        let wheel_speeds = session
            .declare_publisher(WHEEL_SPEEDS_TOPIC)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        let mode_requests = session
            .declare_publisher(MODE_REQUEST_TOPIC)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        let stream_start = session
            .declare_publisher(STREAM_START_TOPIC)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        let display = session
            .declare_publisher(DISPLAY_TOPIC)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(Self {
            wheel_speeds,
            mode_requests,
            stream_start,
            display,
            max_wheel_speed_mm_s,
        })
    }
}

/// Encodes a wheel speed command for the bridge, clamping it to the
/// configured ceiling. The bridge forwards whatever it receives, so the
/// ceiling has to be applied here.
fn wheel_speed_message(speeds: WheelSpeedCommand, max_mm_s: i32) -> anyhow::Result<String> {
    let limited = speeds.clamped_to(max_mm_s);
    if limited != speeds {
        warn!("Clamping wheel speed command {:?}", speeds);
    }
    Ok(serde_json::to_string(&limited)?)
}

#[async_trait]
impl RobotLink for ZenohRobotLink {
    async fn send_wheel_speeds(&mut self, speeds: WheelSpeedCommand) -> anyhow::Result<()> {
        let message = wheel_speed_message(speeds, self.max_wheel_speed_mm_s)?;
        self.wheel_speeds
            .put(message)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }

    async fn request_mode(&mut self, mode: ModeCommand) -> anyhow::Result<()> {
        self.mode_requests
            .put(mode.token())
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }

    async fn start_sensor_stream(&mut self) -> anyhow::Result<()> {
        self.stream_start
            .put("start")
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }

    async fn set_display(&mut self, text: &str) -> anyhow::Result<()> {
        self.display
            .put(text)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }
}
