//! # Configuration
//!
//! Process configuration loaded from environment variables.

pub mod controller;

pub use controller::ControllerConfig;
