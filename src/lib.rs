#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod control;
pub mod driver;
pub mod error;
pub mod geo;
pub mod lidar;
pub mod logging;
pub mod navigation;
pub mod util;
