use std::time::Instant;
use tracing::*;

use crate::configuration::BaseConfig;
use crate::differential_controller::WheelSpeedCommand;
use crate::driver::RobotLink;
use crate::messages::{ModeCommand, OdometryMessage, RobotMode, SensorFrame, VelocityCommand};
use crate::odometry::OdometryEstimator;
use crate::watchdog::Watchdog;

/// Four blanks clear the seven segment display.
const DISPLAY_BLANK: &str = "    ";

/// Drives one base: folds sensor frames into odometry, translates velocity
/// commands into wheel speeds and keeps the session alive.
pub struct RobotController {
    config: BaseConfig,
    estimator: OdometryEstimator,
    watchdog: Watchdog,
    link: Box<dyn RobotLink>,
    reported_mode: RobotMode,
}

impl RobotController {
    pub fn new(config: BaseConfig, link: Box<dyn RobotLink>, now: Instant) -> Self {
        Self {
            estimator: OdometryEstimator::new(config.clone()),
            watchdog: Watchdog::new(now),
            link,
            reported_mode: RobotMode::Off,
            config,
        }
    }

    /// Bring the base up: wake it, unlock the actuators, start the sensor
    /// stream and clear the display.
    pub async fn initialise(&mut self) -> anyhow::Result<()> {
        self.link.request_mode(ModeCommand::Start).await?;
        self.link.request_mode(ModeCommand::Safe).await?;
        self.link.start_sensor_stream().await?;
        self.link.set_display(DISPLAY_BLANK).await?;
        Ok(())
    }

    pub async fn handle_sensor_frame(
        &mut self,
        frame: &SensorFrame,
        now: Instant,
    ) -> anyhow::Result<OdometryMessage> {
        self.watchdog.sensor_updated(now);
        self.reported_mode = frame.mode;
        let twist = self
            .estimator
            .update(frame.left_encoder, frame.right_encoder, frame.time);
        trace!("Pose {}", self.estimator.pose());
        if let Some(percentage) = frame.battery_percentage() {
            self.link.set_display(&percentage.to_string()).await?;
        }
        Ok(OdometryMessage {
            time: frame.time,
            pose: self.estimator.pose(),
            twist,
        })
    }

    pub async fn handle_velocity_command(
        &mut self,
        command: &VelocityCommand,
        now: Instant,
    ) -> anyhow::Result<()> {
        let speeds = WheelSpeedCommand::from_velocity(command, &self.config);
        // a passive base ignores drive commands until the actuators unlock
        if !speeds.is_stopped() && self.reported_mode == RobotMode::Passive {
            info!("Base is passive, unlocking actuators");
            self.link.request_mode(ModeCommand::Safe).await?;
        }
        self.link.send_wheel_speeds(speeds).await?;
        self.watchdog.command_received(now);
        Ok(())
    }

    /// Returns true when the operator asked the node to exit.
    pub async fn handle_mode_token(&mut self, token: &str) -> anyhow::Result<bool> {
        if token == "exit" {
            return Ok(true);
        }
        match ModeCommand::parse(token) {
            Some(mode) => self.link.request_mode(mode).await?,
            None => warn!("Ignoring unknown base command {:?}", token),
        }
        Ok(false)
    }

    pub async fn tick(&mut self, now: Instant) -> anyhow::Result<()> {
        let action = self.watchdog.poll(now);
        if action.reinitialise {
            warn!("Sensor stream went quiet, reinitialising the base");
            self.initialise().await?;
        }
        if action.stop_drive {
            debug!("No recent velocity commands, stopping the drive");
            self.link
                .send_wheel_speeds(WheelSpeedCommand::stopped())
                .await?;
        }
        Ok(())
    }

    /// Stop the wheels, blank the display and hand control back.
    /// Start from Safe drops the base to Passive.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.link
            .send_wheel_speeds(WheelSpeedCommand::stopped())
            .await?;
        self.link.set_display(DISPLAY_BLANK).await?;
        self.link.request_mode(ModeCommand::Start).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::VelocityEstimation;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum LinkCall {
        WheelSpeeds(WheelSpeedCommand),
        Mode(ModeCommand),
        StreamStart,
        Display(String),
    }

    struct RecordingLink {
        calls: Arc<Mutex<Vec<LinkCall>>>,
    }

    #[async_trait]
    impl RobotLink for RecordingLink {
        async fn send_wheel_speeds(&mut self, speeds: WheelSpeedCommand) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(LinkCall::WheelSpeeds(speeds));
            Ok(())
        }

        async fn request_mode(&mut self, mode: ModeCommand) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(LinkCall::Mode(mode));
            Ok(())
        }

        async fn start_sensor_stream(&mut self) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(LinkCall::StreamStart);
            Ok(())
        }

        async fn set_display(&mut self, text: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(LinkCall::Display(text.to_owned()));
            Ok(())
        }
    }

    fn test_config() -> BaseConfig {
        BaseConfig {
            wheel_diameter_mm: 72.0,
            counts_per_revolution: 508.8,
            axle_distance_mm: 235.0,
            backwards: false,
            max_wheel_speed_mm_s: 500,
            max_sensor_rate_hz: 100.0,
            velocity_estimation: VelocityEstimation::WorldFrame,
        }
    }

    fn test_controller(now: Instant) -> (RobotController, Arc<Mutex<Vec<LinkCall>>>) {
        let calls = Arc::new(Mutex::new(vec![]));
        let link = RecordingLink {
            calls: calls.clone(),
        };
        let controller = RobotController::new(test_config(), Box::new(link), now);
        (controller, calls)
    }

    fn take_calls(calls: &Arc<Mutex<Vec<LinkCall>>>) -> Vec<LinkCall> {
        std::mem::take(&mut *calls.lock().unwrap())
    }

    fn frame(left: i16, right: i16, mode: RobotMode, milliseconds: i64) -> SensorFrame {
        SensorFrame {
            time: Utc.timestamp_millis_opt(milliseconds).unwrap(),
            left_encoder: left,
            right_encoder: right,
            mode,
            battery_charge_mah: 2075,
            battery_capacity_mah: 2696,
        }
    }

    #[tokio::test]
    async fn initialise_wakes_and_unlocks_the_base() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller.initialise().await.unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![
                LinkCall::Mode(ModeCommand::Start),
                LinkCall::Mode(ModeCommand::Safe),
                LinkCall::StreamStart,
                LinkCall::Display("    ".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn first_frame_seeds_without_motion() {
        let start = Instant::now();
        let (mut controller, _calls) = test_controller(start);
        let message = controller
            .handle_sensor_frame(&frame(21_000, -17_000, RobotMode::Safe, 0), start)
            .await
            .unwrap();
        assert_relative_eq!(message.pose.x, 0.0);
        assert_relative_eq!(message.pose.y, 0.0);
        assert_relative_eq!(message.twist.vx, 0.0);
    }

    #[tokio::test]
    async fn sensor_frames_advance_the_pose() {
        let start = Instant::now();
        let (mut controller, _calls) = test_controller(start);
        controller
            .handle_sensor_frame(&frame(0, 0, RobotMode::Safe, 0), start)
            .await
            .unwrap();
        let message = controller
            .handle_sensor_frame(
                &frame(100, 100, RobotMode::Safe, 100),
                start + Duration::from_millis(100),
            )
            .await
            .unwrap();
        let expected_x = std::f64::consts::PI * 72.0 * 100.0 / 508.8 / 1000.0;
        assert_relative_eq!(message.pose.x, expected_x, max_relative = 1e-9);
        assert_relative_eq!(message.twist.vx, expected_x / 0.1, max_relative = 1e-9);
    }

    #[tokio::test]
    async fn battery_reading_drives_the_display() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller
            .handle_sensor_frame(&frame(0, 0, RobotMode::Safe, 0), start)
            .await
            .unwrap();
        assert_eq!(take_calls(&calls), vec![LinkCall::Display("77".to_owned())]);
    }

    #[tokio::test]
    async fn missing_battery_capacity_skips_the_display() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        let mut charging = frame(0, 0, RobotMode::Safe, 0);
        charging.battery_capacity_mah = 0;
        controller
            .handle_sensor_frame(&charging, start)
            .await
            .unwrap();
        assert_eq!(take_calls(&calls), vec![]);
    }

    #[tokio::test]
    async fn passive_base_is_unlocked_before_driving() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller
            .handle_sensor_frame(&frame(0, 0, RobotMode::Passive, 0), start)
            .await
            .unwrap();
        take_calls(&calls);
        controller
            .handle_velocity_command(
                &VelocityCommand {
                    linear: 0.2,
                    angular: 0.0,
                },
                start,
            )
            .await
            .unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![
                LinkCall::Mode(ModeCommand::Safe),
                LinkCall::WheelSpeeds(WheelSpeedCommand {
                    left_mm_s: 200,
                    right_mm_s: 200,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn safe_base_drives_without_mode_change() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller
            .handle_sensor_frame(&frame(0, 0, RobotMode::Safe, 0), start)
            .await
            .unwrap();
        take_calls(&calls);
        controller
            .handle_velocity_command(
                &VelocityCommand {
                    linear: 0.0,
                    angular: 1.0,
                },
                start,
            )
            .await
            .unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![LinkCall::WheelSpeeds(WheelSpeedCommand {
                left_mm_s: -117,
                right_mm_s: 117,
            })]
        );
    }

    #[tokio::test]
    async fn stopping_never_unlocks_a_passive_base() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller
            .handle_sensor_frame(&frame(0, 0, RobotMode::Passive, 0), start)
            .await
            .unwrap();
        take_calls(&calls);
        controller
            .handle_velocity_command(&VelocityCommand::default(), start)
            .await
            .unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![LinkCall::WheelSpeeds(WheelSpeedCommand::stopped())]
        );
    }

    #[tokio::test]
    async fn quiet_command_channel_stops_once_per_window() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller
            .tick(start + Duration::from_millis(1_200))
            .await
            .unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![LinkCall::WheelSpeeds(WheelSpeedCommand::stopped())]
        );
        controller
            .tick(start + Duration::from_millis(1_900))
            .await
            .unwrap();
        assert_eq!(take_calls(&calls), vec![]);
        controller
            .tick(start + Duration::from_millis(2_300))
            .await
            .unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![LinkCall::WheelSpeeds(WheelSpeedCommand::stopped())]
        );
    }

    #[tokio::test]
    async fn quiet_sensor_stream_reinitialises_the_base() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller.tick(start + Duration::from_secs(6)).await.unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![
                LinkCall::Mode(ModeCommand::Start),
                LinkCall::Mode(ModeCommand::Safe),
                LinkCall::StreamStart,
                LinkCall::Display("    ".to_owned()),
                LinkCall::WheelSpeeds(WheelSpeedCommand::stopped()),
            ]
        );
    }

    #[tokio::test]
    async fn mode_tokens_forward_to_the_base() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        assert!(!controller.handle_mode_token("full").await.unwrap());
        assert!(!controller.handle_mode_token("powerdown").await.unwrap());
        assert_eq!(
            take_calls(&calls),
            vec![
                LinkCall::Mode(ModeCommand::Full),
                LinkCall::Mode(ModeCommand::PowerDown),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_tokens_are_ignored() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        assert!(!controller.handle_mode_token("dance").await.unwrap());
        assert_eq!(take_calls(&calls), vec![]);
    }

    #[tokio::test]
    async fn exit_token_requests_teardown() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        assert!(controller.handle_mode_token("exit").await.unwrap());
        assert_eq!(take_calls(&calls), vec![]);
    }

    #[tokio::test]
    async fn shutdown_parks_the_base() {
        let start = Instant::now();
        let (mut controller, calls) = test_controller(start);
        controller.shutdown().await.unwrap();
        assert_eq!(
            take_calls(&calls),
            vec![
                LinkCall::WheelSpeeds(WheelSpeedCommand::stopped()),
                LinkCall::Display("    ".to_owned()),
                LinkCall::Mode(ModeCommand::Start),
            ]
        );
    }
}
