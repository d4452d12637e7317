#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod controller;
pub mod differential_controller;
pub mod driver;
pub mod error;
pub mod logging;
pub mod messages;
pub mod odometry;
pub mod watchdog;
