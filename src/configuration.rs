use config::Config;
use serde::Deserialize;
use std::{f64::consts::PI, path::PathBuf};
use tracing::*;

use crate::error::ErrorWrapper;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub base: BaseConfig,
    #[serde(default)]
    pub zenoh: BumbleZenohConfig,
    /// rate of the watchdog cycle in Hz
    #[serde(default = "default_cycle_rate_hz")]
    pub cycle_rate_hz: f64,
}

fn default_cycle_rate_hz() -> f64 {
    100.0
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings"))
                .build()?
        };

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rates and geometry have to be positive, anything else would stall
    /// the cycle timer or divide by zero in the estimator.
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.cycle_rate_hz > 0.0, "cycle_rate_hz must be positive");
        self.base.validate()
    }
}

/// Wheel geometry and drive limits of the robot base.
#[derive(Deserialize, Debug, Clone)]
pub struct BaseConfig {
    pub wheel_diameter_mm: f64,
    pub counts_per_revolution: f64,
    pub axle_distance_mm: f64,
    /// true when the drive unit is mounted facing backwards
    #[serde(default)]
    pub backwards: bool,
    /// software cap on wheel speed commands, applied at the transport seam.
    /// The base firmware rejects anything faster.
    #[serde(default = "default_max_wheel_speed_mm_s")]
    pub max_wheel_speed_mm_s: i32,
    /// fastest sensor stream the estimator will believe; the reciprocal of
    /// this rate is the floor for integration time steps
    #[serde(default = "default_max_sensor_rate_hz")]
    pub max_sensor_rate_hz: f64,
    #[serde(default)]
    pub velocity_estimation: VelocityEstimation,
}

fn default_max_wheel_speed_mm_s() -> i32 {
    500
}

fn default_max_sensor_rate_hz() -> f64 {
    100.0
}

impl BaseConfig {
    /// Arc length in millimeters covered by a corrected encoder delta.
    pub fn counts_to_mm(&self, delta_counts: i32) -> f64 {
        PI * self.wheel_diameter_mm * f64::from(delta_counts) / self.counts_per_revolution
    }

    pub fn axle_distance_m(&self) -> f64 {
        self.axle_distance_mm / 1000.0
    }

    /// Shortest time step the integrator will divide by, in seconds.
    pub fn min_update_interval(&self) -> f64 {
        1.0 / self.max_sensor_rate_hz
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.wheel_diameter_mm > 0.0,
            "wheel_diameter_mm must be positive"
        );
        anyhow::ensure!(
            self.counts_per_revolution > 0.0,
            "counts_per_revolution must be positive"
        );
        anyhow::ensure!(
            self.axle_distance_mm > 0.0,
            "axle_distance_mm must be positive"
        );
        anyhow::ensure!(
            self.max_wheel_speed_mm_s > 0,
            "max_wheel_speed_mm_s must be positive"
        );
        anyhow::ensure!(
            self.max_sensor_rate_hz > 0.0,
            "max_sensor_rate_hz must be positive"
        );
        Ok(())
    }
}

/// Strategy for the twist published alongside the pose.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VelocityEstimation {
    /// finite difference of the pose in the world frame
    #[default]
    WorldFrame,
    /// travelled arc projected onto the heading, lateral component zero
    BodyFrame,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BumbleZenohConfig {
    #[serde(default)]
    pub connect: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub listen: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub config_path: Option<String>,
}

impl BumbleZenohConfig {
    pub fn get_zenoh_config(&self) -> anyhow::Result<zenoh::config::Config> {
        let mut config = if let Some(conf_file) = &self.config_path {
            zenoh::config::Config::from_file(conf_file).map_err(ErrorWrapper::ZenohError)?
        } else {
            zenoh::config::Config::default()
        };
        if !self.connect.is_empty() {
            config.connect.endpoints.clone_from(&self.connect);
        }
        if !self.listen.is_empty() {
            config.listen.endpoints.clone_from(&self.listen);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    fn parse(yaml: &str) -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_config() {
        parse(DEFAULT_CONFIG);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let minimal = "
base:
  wheel_diameter_mm: 72.0
  counts_per_revolution: 508.8
  axle_distance_mm: 235.0
";
        let config = parse(minimal);
        assert!(!config.base.backwards);
        assert_eq!(config.base.max_wheel_speed_mm_s, 500);
        assert_relative_eq!(config.base.max_sensor_rate_hz, 100.0);
        assert_relative_eq!(config.cycle_rate_hz, 100.0);
        assert_eq!(
            config.base.velocity_estimation,
            VelocityEstimation::WorldFrame
        );
    }

    #[test]
    fn velocity_estimation_parses_snake_case() {
        let yaml = "
base:
  wheel_diameter_mm: 72.0
  counts_per_revolution: 508.8
  axle_distance_mm: 235.0
  velocity_estimation: body_frame
";
        let config = parse(yaml);
        assert_eq!(
            config.base.velocity_estimation,
            VelocityEstimation::BodyFrame
        );
    }

    #[test]
    fn counts_to_arc_length() {
        let base = parse(DEFAULT_CONFIG).base;
        assert_relative_eq!(
            base.counts_to_mm(100),
            PI * 72.0 * 100.0 / 508.8,
            max_relative = 1e-9
        );
        assert_relative_eq!(base.counts_to_mm(100), 44.46, max_relative = 1e-3);
        assert_relative_eq!(base.counts_to_mm(-100), -44.46, max_relative = 1e-3);
        assert_relative_eq!(base.counts_to_mm(0), 0.0);
    }

    #[test]
    fn shipped_config_passes_validation() {
        parse(DEFAULT_CONFIG).validate().unwrap();
    }

    #[test]
    fn zero_cycle_rate_is_rejected() {
        let mut config = parse(DEFAULT_CONFIG);
        config.cycle_rate_hz = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_sensor_rate_is_rejected() {
        let mut config = parse(DEFAULT_CONFIG);
        config.base.max_sensor_rate_hz = 0.0;
        assert!(config.validate().is_err());
        config.base.max_sensor_rate_hz = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let mut config = parse(DEFAULT_CONFIG);
        config.base.counts_per_revolution = 0.0;
        assert!(config.validate().is_err());
    }
}
