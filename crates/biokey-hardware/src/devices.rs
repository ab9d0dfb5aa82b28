//! Enum wrapper for capture device dispatch.
//!
//! [`CaptureDevice`] returns `impl Future` from its methods and therefore
//! cannot be used as `dyn CaptureDevice`. [`AnyCaptureDevice`] gives concrete
//! dispatch over the drivers compiled into the binary instead.
//!
//! # Examples
//!
//! ```
//! use biokey_hardware::devices::AnyCaptureDevice;
//! use biokey_hardware::mock::MockSensor;
//!
//! let (sensor, _handle) = MockSensor::new();
//! let device = AnyCaptureDevice::Mock(sensor);
//! ```

use crate::mock::MockSensor;
use crate::traits::CaptureDevice;
use crate::types::{CaptureParams, CaptureQuality, DeviceEvent, DeviceInfo};
use crate::Result;
use biokey_core::DeviceModel;
use tokio::sync::broadcast;

/// Any supported fingerprint sensor.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCaptureDevice {
    /// Mock sensor for development and testing.
    Mock(MockSensor),
}

impl From<MockSensor> for AnyCaptureDevice {
    fn from(sensor: MockSensor) -> Self {
        Self::Mock(sensor)
    }
}

impl CaptureDevice for AnyCaptureDevice {
    async fn initialize(&self, model: DeviceModel, client_key: Option<&str>) -> Result<DeviceInfo> {
        match self {
            Self::Mock(device) => device.initialize(model, client_key).await,
        }
    }

    async fn teardown(&self) -> Result<()> {
        match self {
            Self::Mock(device) => device.teardown().await,
        }
    }

    async fn begin_capture(&self, params: CaptureParams) -> Result<()> {
        match self {
            Self::Mock(device) => device.begin_capture(params).await,
        }
    }

    async fn capture_once(&self, params: CaptureParams) -> Result<CaptureQuality> {
        match self {
            Self::Mock(device) => device.capture_once(params).await,
        }
    }

    async fn cancel_capture(&self) -> Result<()> {
        match self {
            Self::Mock(device) => device.cancel_capture().await,
        }
    }

    async fn fetch_template(&self) -> Result<Vec<u8>> {
        match self {
            Self::Mock(device) => device.fetch_template().await,
        }
    }

    async fn fetch_image(&self) -> Result<Vec<u8>> {
        match self {
            Self::Mock(device) => device.fetch_image().await,
        }
    }

    async fn compare_templates(&self, probe: &[u8], reference: &[u8]) -> Result<i32> {
        match self {
            Self::Mock(device) => device.compare_templates(probe, reference).await,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        match self {
            Self::Mock(device) => device.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_any_device_dispatch() {
        let (sensor, handle) = MockSensor::new();
        let device = AnyCaptureDevice::from(sensor);

        let info = device.initialize(DeviceModel::Melo31, None).await.unwrap();
        assert_eq!(info.model, "MELO31");
        assert!(handle.is_initialized());

        handle.place_finger(vec![3, 1, 4], 70).unwrap();
        let quality = device.capture_once(CaptureParams::default()).await.unwrap();
        assert_eq!(quality.quality, 70);
        assert_eq!(device.fetch_template().await.unwrap(), vec![3, 1, 4]);

        device.teardown().await.unwrap();
        assert!(!handle.is_initialized());
    }
}
