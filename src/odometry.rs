use chrono::{DateTime, Utc};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt::Display;

use crate::configuration::{BaseConfig, VelocityEstimation};

/// Jumps past this between consecutive samples are treated as wrap around
/// of the 16 bit counter rather than real motion. No wheel covers half the
/// counter range in one streaming interval.
const WRAP_THRESHOLD: i32 = 30_000;
const ENCODER_RANGE: i32 = 65_536;

/// Difference between consecutive readings of a wrapping 16 bit encoder.
pub fn wrapped_delta(previous: i16, current: i16) -> i32 {
    let delta = i32::from(current) - i32::from(previous);
    if delta < -WRAP_THRESHOLD {
        delta + ENCODER_RANGE
    } else if delta > WRAP_THRESHOLD {
        delta - ENCODER_RANGE
    } else {
        delta
    }
}

/// Normalise an angle into [0, 2π).
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid of a tiny negative rounds up to exactly 2π
    if wrapped == TAU {
        0.0
    } else {
        wrapped
    }
}

/// Planar pose in the odometry frame. `theta` stays in [0, 2π).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2d {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose2d {
    pub fn rotation(&self) -> na::Rotation2<f64> {
        na::Rotation2::new(self.theta)
    }
}

impl Display for Pose2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x: {:.3} m, y: {:.3} m, heading: {:.1}°",
            self.x,
            self.y,
            self.theta.to_degrees()
        )
    }
}

/// Estimated twist of the base. `vx` and `vy` are meters per second,
/// `omega` radians per second.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityEstimate {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

/// Dead reckoning from the wheel encoders.
///
/// Euler integration of the differential drive model. Each sample moves the
/// pose along the heading it had before the sample, then turns it.
pub struct OdometryEstimator {
    config: BaseConfig,
    pose: Pose2d,
    previous_counts: Option<(i16, i16)>,
    last_update_time: Option<DateTime<Utc>>,
}

impl OdometryEstimator {
    pub fn new(config: BaseConfig) -> Self {
        Self {
            config,
            pose: Pose2d::default(),
            previous_counts: None,
            last_update_time: None,
        }
    }

    pub fn pose(&self) -> Pose2d {
        self.pose
    }

    /// Fold one encoder sample into the pose and estimate the twist.
    ///
    /// The first sample only seeds the counters so a base that booted with
    /// nonzero encoder counts does not leap away from the origin.
    pub fn update(&mut self, left: i16, right: i16, time: DateTime<Utc>) -> VelocityEstimate {
        let (Some((previous_left, previous_right)), Some(last_time)) =
            (self.previous_counts, self.last_update_time)
        else {
            self.previous_counts = Some((left, right));
            self.last_update_time = Some(time);
            return VelocityEstimate::default();
        };

        let left_mm = self.config.counts_to_mm(wrapped_delta(previous_left, left));
        let right_mm = self
            .config
            .counts_to_mm(wrapped_delta(previous_right, right));
        let center_mm = (left_mm + right_mm) / 2.0;
        let turn = (right_mm - left_mm) / self.config.axle_distance_mm;

        let previous_pose = self.pose;
        let displacement = previous_pose.rotation() * na::Vector2::new(center_mm / 1000.0, 0.0);
        self.pose.x += displacement.x;
        self.pose.y += displacement.y;
        self.pose.theta = wrap_angle(previous_pose.theta + turn);

        // a stalled or backwards clock must not blow up the division
        let elapsed_seconds = (time - last_time)
            .num_microseconds()
            .map(|microseconds| microseconds as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        let time_step = elapsed_seconds.max(self.config.min_update_interval());

        // difference of wrapped headings folded back onto (-π, π]
        let heading_change = self.pose.theta - previous_pose.theta;
        let omega = heading_change.sin().atan2(heading_change.cos()) / time_step;

        let estimate = match self.config.velocity_estimation {
            VelocityEstimation::WorldFrame => VelocityEstimate {
                vx: (self.pose.x - previous_pose.x) / time_step,
                vy: (self.pose.y - previous_pose.y) / time_step,
                omega,
            },
            VelocityEstimation::BodyFrame => VelocityEstimate {
                vx: center_mm / 1000.0 / time_step,
                vy: 0.0,
                omega,
            },
        };

        self.previous_counts = Some((left, right));
        self.last_update_time = Some(time);
        estimate
    }
}
