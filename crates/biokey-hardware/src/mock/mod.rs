//! Mock device implementations for testing and development.
//!
//! This module provides a simulated fingerprint sensor that can be controlled
//! programmatically without requiring physical hardware.

pub mod sensor;

pub use sensor::{Frame, MockSensor, MockSensorHandle};
