//! Fingerprint sensor abstraction for biokey.
//!
//! This crate defines the [`CaptureDevice`] trait that every sensor driver
//! implements, the types exchanged with a sensor, and a programmable
//! [`MockSensor`](mock::MockSensor) for development and testing.
//!
//! # Design
//!
//! - **Async-first**: device calls return futures; slow operations never block
//!   the runtime.
//! - **Shared access**: methods take `&self` so a capture can be cancelled
//!   from another task while it is pending.
//! - **Typed failures**: vendor result codes become [`HardwareError`] variants.
//!   Timeouts and disconnects get dedicated variants because the session layer
//!   reacts to them differently.
//!
//! # Example
//!
//! ```
//! use biokey_core::DeviceModel;
//! use biokey_hardware::mock::MockSensor;
//! use biokey_hardware::{CaptureDevice, CaptureParams};
//!
//! #[tokio::main]
//! async fn main() -> biokey_hardware::Result<()> {
//!     let (sensor, handle) = MockSensor::new();
//!     sensor.initialize(DeviceModel::Mfs500, None).await?;
//!
//!     handle.place_finger(vec![0xAB; 16], 90)?;
//!     let probe = {
//!         sensor.capture_once(CaptureParams::default()).await?;
//!         sensor.fetch_template().await?
//!     };
//!
//!     let score = sensor.compare_templates(&probe, &[0xAB; 16]).await?;
//!     assert_eq!(score, 1000);
//!     Ok(())
//! }
//! ```

pub mod devices;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use devices::AnyCaptureDevice;
pub use error::{HardwareError, Result};
pub use traits::CaptureDevice;
pub use types::{CaptureParams, CaptureQuality, ConnectionState, DeviceEvent, DeviceInfo};
