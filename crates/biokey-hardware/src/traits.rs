//! Capture device trait definition.
//!
//! [`CaptureDevice`] is the contract between the session layer and a
//! fingerprint sensor driver. Every method takes `&self` so a single device can
//! be shared behind an `Arc` between the task that waits on a capture and the
//! task that cancels it.
//!
//! Methods return `impl Future + Send` rather than using bare `async fn` so
//! callers that are generic over the device can hand the futures to
//! `tokio::spawn`. Implementations may still write `async fn`.

use crate::Result;
use crate::types::{CaptureParams, CaptureQuality, DeviceEvent, DeviceInfo};
use biokey_core::DeviceModel;
use std::future::Future;
use tokio::sync::broadcast;

/// Fingerprint sensor driver.
///
/// **NOTE**: This trait is NOT object-safe because its methods return
/// `impl Future`. Use [`AnyCaptureDevice`](crate::devices::AnyCaptureDevice)
/// for runtime dispatch between drivers.
///
/// # Capture styles
///
/// The sensor offers two ways to capture:
///
/// - [`begin_capture`](Self::begin_capture) starts an asynchronous capture and
///   returns immediately. The outcome arrives later as a
///   [`DeviceEvent::CaptureCompleted`] on the event stream. Only this style can
///   be aborted with [`cancel_capture`](Self::cancel_capture).
/// - [`capture_once`](Self::capture_once) blocks until a finger is accepted, the
///   timeout expires, or the sensor fails.
///
/// After a successful capture, [`fetch_template`](Self::fetch_template) and
/// [`fetch_image`](Self::fetch_image) return the data of the last accepted
/// finger.
///
/// # Examples
///
/// ```
/// use biokey_core::DeviceModel;
/// use biokey_hardware::{CaptureDevice, CaptureParams, Result};
///
/// async fn capture_template<D: CaptureDevice>(device: &D) -> Result<Vec<u8>> {
///     device.initialize(DeviceModel::Mfs500, None).await?;
///     device.capture_once(CaptureParams::default()).await?;
///     device.fetch_template().await
/// }
/// ```
pub trait CaptureDevice: Send + Sync + 'static {
    /// Open the sensor for the given model.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::InitializationFailed`](crate::HardwareError::InitializationFailed)
    /// with the vendor code, or `Disconnected` when no sensor is plugged in.
    fn initialize(
        &self,
        model: DeviceModel,
        client_key: Option<&str>,
    ) -> impl Future<Output = Result<DeviceInfo>> + Send;

    /// Release the sensor. Safe to call on an uninitialized device.
    fn teardown(&self) -> impl Future<Output = Result<()>> + Send;

    /// Start an asynchronous capture. Completion is reported as an event.
    fn begin_capture(&self, params: CaptureParams) -> impl Future<Output = Result<()>> + Send;

    /// Capture synchronously.
    ///
    /// # Errors
    ///
    /// `Timeout` when no acceptable finger arrives in time, `Disconnected` when
    /// the sensor is removed mid-capture, `Failure` for any other vendor code.
    fn capture_once(
        &self,
        params: CaptureParams,
    ) -> impl Future<Output = Result<CaptureQuality>> + Send;

    /// Abort an asynchronous capture started with `begin_capture`.
    ///
    /// On success no completion event is emitted for the aborted capture.
    fn cancel_capture(&self) -> impl Future<Output = Result<()>> + Send;

    /// Template of the last accepted finger.
    fn fetch_template(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Raw image of the last accepted finger.
    fn fetch_image(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Compare two templates and return a similarity score.
    ///
    /// Higher is more similar. The scale is defined by the sensor vendor.
    fn compare_templates(
        &self,
        probe: &[u8],
        reference: &[u8],
    ) -> impl Future<Output = Result<i32>> + Send;

    /// Subscribe to the sensor's event stream.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}
