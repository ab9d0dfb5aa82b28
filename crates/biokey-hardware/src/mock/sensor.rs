//! Mock fingerprint sensor for testing and development.
//!
//! The sensor is driven from a [`MockSensorHandle`]: tests queue finger
//! placements, inject vendor failure codes, and plug or unplug the device.
//! Captures consume placements in order. A finger below the requested quality
//! shows up as a preview frame and is otherwise ignored, exactly like a real
//! sensor keeps waiting for a better placement.

use crate::{
    HardwareError, Result,
    traits::CaptureDevice,
    types::{CaptureParams, CaptureQuality, ConnectionState, DeviceEvent, DeviceInfo},
};
use biokey_core::{DeviceModel, ResultCode};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

const MOCK_MAKE: &str = "Mock";
const MOCK_FIRMWARE: &str = "1.0.0";
const MOCK_WIDTH: u32 = 300;
const MOCK_HEIGHT: u32 = 400;

/// A finger as seen by the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub template: Vec<u8>,
    pub image: Vec<u8>,
    pub quality: u8,
}

impl Frame {
    /// Frame with a synthetic image derived from the template.
    pub fn new(template: impl Into<Vec<u8>>, quality: u8) -> Self {
        let template = template.into();
        let image = template.iter().rev().copied().collect();
        Self {
            template,
            image,
            quality,
        }
    }

    pub fn with_image(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.image = image.into();
        self
    }
}

#[derive(Debug, Clone)]
enum Placement {
    Finger(Frame),
    Timeout,
    Failure(i32),
}

#[derive(Debug, Default)]
struct SensorState {
    initialized: bool,
    last_frame: Option<Frame>,
    init_failure: Option<i32>,
    cancel_failure: Option<i32>,
    teardown_failure: Option<i32>,
    image_failures: VecDeque<i32>,
    template_failures: VecDeque<i32>,
    compare_failures: VecDeque<i32>,
    scores: HashMap<Vec<u8>, i32>,
    compare_calls: usize,
    capture_requests: usize,
    cancel_requests: usize,
    teardown_calls: usize,
}

#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<SensorState>,
    placements: tokio::sync::Mutex<mpsc::UnboundedReceiver<Placement>>,
    events: broadcast::Sender<DeviceEvent>,
    /// Bumped on every successful cancel; captures watch it.
    cancel_epoch: watch::Sender<u64>,
    connected: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(HardwareError::disconnected(&self.name));
        }
        if !self.state().initialized {
            return Err(HardwareError::NotInitialized);
        }
        Ok(())
    }

    /// Wait for an acceptable finger. `Ok(None)` means the capture was cancelled.
    async fn wait_for_finger(
        &self,
        params: CaptureParams,
        mut cancel: watch::Receiver<u64>,
        mut connected: watch::Receiver<bool>,
    ) -> Result<Option<CaptureQuality>> {
        let mut placements = self.placements.lock().await;
        let deadline = tokio::time::sleep(params.timeout());
        tokio::pin!(deadline);

        loop {
            if !*connected.borrow_and_update() {
                return Err(HardwareError::disconnected(&self.name));
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => return Ok(None),
                _ = connected.changed() => continue,
                placement = placements.recv() => match placement {
                    Some(Placement::Finger(frame)) => {
                        self.emit(DeviceEvent::Preview {
                            result: ResultCode::Success,
                            quality: frame.quality,
                        });
                        if frame.quality < params.min_quality {
                            debug!(quality = frame.quality, min = params.min_quality, "Finger below quality, waiting");
                            continue;
                        }
                        let quality = CaptureQuality::from_quality(frame.quality);
                        self.state().last_frame = Some(frame);
                        return Ok(Some(quality));
                    }
                    Some(Placement::Timeout) => {
                        return Err(HardwareError::timeout(u64::from(params.timeout_ms)));
                    }
                    Some(Placement::Failure(code)) => return Err(HardwareError::from_code(code)),
                    None => return Err(HardwareError::disconnected(&self.name)),
                },
                () = &mut deadline => {
                    return Err(HardwareError::timeout(u64::from(params.timeout_ms)));
                }
            }
        }
    }
}

/// Mock fingerprint sensor.
///
/// # Examples
///
/// ```
/// use biokey_core::DeviceModel;
/// use biokey_hardware::mock::MockSensor;
/// use biokey_hardware::{CaptureDevice, CaptureParams};
///
/// #[tokio::main]
/// async fn main() -> biokey_hardware::Result<()> {
///     let (sensor, handle) = MockSensor::new();
///     sensor.initialize(DeviceModel::Mfs500, None).await?;
///
///     handle.place_finger(vec![1, 2, 3, 4], 82)?;
///     let quality = sensor.capture_once(CaptureParams::default()).await?;
///     assert_eq!(quality.quality, 82);
///     assert_eq!(sensor.fetch_template().await?, vec![1, 2, 3, 4]);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockSensor {
    shared: Arc<Shared>,
}

impl MockSensor {
    /// Create a connected, uninitialized sensor named "MFS500".
    pub fn new() -> (Self, MockSensorHandle) {
        Self::with_name("MFS500")
    }

    /// Create a sensor that announces itself with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockSensorHandle) {
        let (placement_tx, placement_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(SensorState::default()),
            placements: tokio::sync::Mutex::new(placement_rx),
            events,
            cancel_epoch: watch::Sender::new(0),
            connected: watch::Sender::new(true),
        });

        let handle = MockSensorHandle {
            shared: Arc::clone(&shared),
            placements: placement_tx,
        };

        (Self { shared }, handle)
    }
}

impl CaptureDevice for MockSensor {
    async fn initialize(&self, model: DeviceModel, _client_key: Option<&str>) -> Result<DeviceInfo> {
        if !self.shared.is_connected() {
            return Err(HardwareError::disconnected(&self.shared.name));
        }

        let mut state = self.shared.state();
        if let Some(code) = state.init_failure.take() {
            return Err(HardwareError::initialization_failed(
                code,
                format!("Sensor rejected initialization for {model}"),
            ));
        }
        state.initialized = true;
        debug!(device = %self.shared.name, %model, "Mock sensor initialized");

        Ok(DeviceInfo::new(&self.shared.name, MOCK_MAKE, model.name())
            .with_serial_number(format!("MOCK-{}", model.name()))
            .with_firmware_version(MOCK_FIRMWARE)
            .with_dimensions(MOCK_WIDTH, MOCK_HEIGHT))
    }

    async fn teardown(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.teardown_calls += 1;
        if let Some(code) = state.teardown_failure.take() {
            return Err(HardwareError::from_code(code));
        }
        state.initialized = false;
        state.last_frame = None;
        Ok(())
    }

    async fn begin_capture(&self, params: CaptureParams) -> Result<()> {
        self.shared.ensure_ready()?;
        self.shared.state().capture_requests += 1;

        let cancel = self.shared.cancel_epoch.subscribe();
        let connected = self.shared.connected.subscribe();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let event = match shared.wait_for_finger(params, cancel, connected).await {
                Ok(Some(quality)) => DeviceEvent::CaptureCompleted {
                    result: ResultCode::Success,
                    quality: quality.quality,
                    nfiq: quality.nfiq,
                },
                Ok(None) => {
                    debug!("Asynchronous capture cancelled");
                    return;
                }
                Err(err) => DeviceEvent::CaptureCompleted {
                    result: err.result_code(),
                    quality: 0,
                    nfiq: 0,
                },
            };
            shared.emit(event);
        });

        Ok(())
    }

    async fn capture_once(&self, params: CaptureParams) -> Result<CaptureQuality> {
        self.shared.ensure_ready()?;
        self.shared.state().capture_requests += 1;

        let cancel = self.shared.cancel_epoch.subscribe();
        let connected = self.shared.connected.subscribe();

        match self.shared.wait_for_finger(params, cancel, connected).await? {
            Some(quality) => Ok(quality),
            // A cancelled single-shot capture looks like a timeout to the caller.
            None => Err(HardwareError::timeout(u64::from(params.timeout_ms))),
        }
    }

    async fn cancel_capture(&self) -> Result<()> {
        let failure = {
            let mut state = self.shared.state();
            state.cancel_requests += 1;
            state.cancel_failure.take()
        };
        if let Some(code) = failure {
            return Err(HardwareError::from_code(code));
        }
        self.shared.cancel_epoch.send_modify(|epoch| *epoch += 1);
        Ok(())
    }

    async fn fetch_template(&self) -> Result<Vec<u8>> {
        self.shared.ensure_ready()?;
        let mut state = self.shared.state();
        if let Some(code) = state.template_failures.pop_front() {
            return Err(HardwareError::from_code(code));
        }
        state
            .last_frame
            .as_ref()
            .map(|frame| frame.template.clone())
            .ok_or_else(|| HardwareError::invalid_data("No finger captured"))
    }

    async fn fetch_image(&self) -> Result<Vec<u8>> {
        self.shared.ensure_ready()?;
        let mut state = self.shared.state();
        if let Some(code) = state.image_failures.pop_front() {
            return Err(HardwareError::from_code(code));
        }
        state
            .last_frame
            .as_ref()
            .map(|frame| frame.image.clone())
            .ok_or_else(|| HardwareError::invalid_data("No finger captured"))
    }

    async fn compare_templates(&self, probe: &[u8], reference: &[u8]) -> Result<i32> {
        self.shared.ensure_ready()?;
        let mut state = self.shared.state();
        state.compare_calls += 1;
        if let Some(code) = state.compare_failures.pop_front() {
            return Err(HardwareError::from_code(code));
        }
        Ok(state
            .scores
            .get(reference)
            .copied()
            .unwrap_or_else(|| similarity(probe, reference)))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }
}

/// Share of equal bytes at equal positions, scaled to 0..=1000.
fn similarity(probe: &[u8], reference: &[u8]) -> i32 {
    let longest = probe.len().max(reference.len());
    if probe.is_empty() || reference.is_empty() {
        return 0;
    }
    let equal = probe
        .iter()
        .zip(reference)
        .filter(|(a, b)| a == b)
        .count();
    i32::try_from(equal * 1000 / longest).unwrap_or(i32::MAX)
}

/// Handle for controlling a [`MockSensor`].
///
/// # Examples
///
/// ```
/// use biokey_hardware::mock::MockSensor;
///
/// let (_sensor, handle) = MockSensor::new();
///
/// handle.place_finger(vec![9, 9, 9], 40).unwrap(); // too weak, ignored
/// handle.place_finger(vec![1, 2, 3], 85).unwrap();
/// handle.time_out_next().unwrap();
/// handle.set_score(vec![1, 2, 3], 450);
/// ```
#[derive(Debug, Clone)]
pub struct MockSensorHandle {
    shared: Arc<Shared>,
    placements: mpsc::UnboundedSender<Placement>,
}

impl MockSensorHandle {
    fn queue(&self, placement: Placement) -> Result<()> {
        self.placements
            .send(placement)
            .map_err(|_| HardwareError::disconnected("Sensor placement channel closed"))
    }

    /// Place a finger with a synthetic image.
    ///
    /// # Errors
    ///
    /// Returns an error if the sensor has been dropped.
    pub fn place_finger(&self, template: impl Into<Vec<u8>>, quality: u8) -> Result<()> {
        self.place_frame(Frame::new(template, quality))
    }

    pub fn place_frame(&self, frame: Frame) -> Result<()> {
        self.queue(Placement::Finger(frame))
    }

    /// Make the next pending capture time out.
    pub fn time_out_next(&self) -> Result<()> {
        self.queue(Placement::Timeout)
    }

    /// Make the next pending capture fail with a vendor code.
    pub fn fail_next_capture(&self, code: i32) -> Result<()> {
        self.queue(Placement::Failure(code))
    }

    pub fn fail_init(&self, code: i32) {
        self.shared.state().init_failure = Some(code);
    }

    pub fn fail_cancel(&self, code: i32) {
        self.shared.state().cancel_failure = Some(code);
    }

    pub fn fail_teardown(&self, code: i32) {
        self.shared.state().teardown_failure = Some(code);
    }

    pub fn fail_next_image(&self, code: i32) {
        self.shared.state().image_failures.push_back(code);
    }

    pub fn fail_next_template(&self, code: i32) {
        self.shared.state().template_failures.push_back(code);
    }

    pub fn fail_next_compare(&self, code: i32) {
        self.shared.state().compare_failures.push_back(code);
    }

    /// Fix the comparison score for any probe against `reference`.
    pub fn set_score(&self, reference: impl Into<Vec<u8>>, score: i32) {
        self.shared.state().scores.insert(reference.into(), score);
    }

    /// Emit a detection event for the current connection state.
    pub fn announce(&self) {
        let state = if self.shared.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.shared.emit(DeviceEvent::Detected {
            name: self.shared.name.clone(),
            state,
        });
    }

    /// Plug the sensor back in.
    pub fn connect(&self) {
        self.shared.connected.send_replace(true);
        self.announce();
    }

    /// Unplug the sensor. Pending captures fail with a disconnect.
    pub fn disconnect(&self) {
        self.shared.connected.send_replace(false);
        {
            let mut state = self.shared.state();
            state.initialized = false;
            state.last_frame = None;
        }
        self.announce();
    }

    /// Emit a preview frame carrying an arbitrary result.
    pub fn preview(&self, result: ResultCode, quality: u8) {
        self.shared.emit(DeviceEvent::Preview { result, quality });
    }

    pub fn report_finger_position(&self, position: i32) {
        self.shared.emit(DeviceEvent::FingerPosition {
            result: ResultCode::Success,
            position,
        });
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.state().initialized
    }

    /// Number of template comparisons performed.
    pub fn compare_calls(&self) -> usize {
        self.shared.state().compare_calls
    }

    /// Number of captures started, either style.
    pub fn capture_requests(&self) -> usize {
        self.shared.state().capture_requests
    }

    pub fn cancel_requests(&self) -> usize {
        self.shared.state().cancel_requests
    }

    pub fn teardown_calls(&self) -> usize {
        self.shared.state().teardown_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn ready_sensor() -> (MockSensor, MockSensorHandle) {
        let (sensor, handle) = MockSensor::new();
        sensor.initialize(DeviceModel::Mfs500, None).await.unwrap();
        (sensor, handle)
    }

    fn params(timeout_ms: u32) -> CaptureParams {
        CaptureParams::new(60, timeout_ms)
    }

    #[tokio::test]
    async fn test_capture_requires_initialization() {
        let (sensor, handle) = MockSensor::new();
        handle.place_finger(vec![1], 90).unwrap();

        let err = sensor.capture_once(params(1000)).await.unwrap_err();
        assert!(matches!(err, HardwareError::NotInitialized));
    }

    #[tokio::test]
    async fn test_initialize_failure_code() {
        let (sensor, handle) = MockSensor::new();
        handle.fail_init(-2001);

        let err = sensor.initialize(DeviceModel::Mfs500, None).await.unwrap_err();
        assert_eq!(err.code(), -2001);
        assert!(!handle.is_initialized());

        // Failure is one-shot.
        let info = sensor.initialize(DeviceModel::Mfs500, None).await.unwrap();
        assert_eq!(info.model, "MFS500");
        assert_eq!((info.width, info.height), (300, 400));
    }

    #[tokio::test]
    async fn test_low_quality_finger_is_skipped() {
        let (sensor, handle) = ready_sensor().await;
        handle.place_finger(vec![9, 9], 30).unwrap();
        handle.place_finger(vec![1, 2], 75).unwrap();

        let quality = sensor.capture_once(params(1000)).await.unwrap();
        assert_eq!(quality.quality, 75);
        assert_eq!(sensor.fetch_template().await.unwrap(), vec![1, 2]);
        assert_eq!(sensor.fetch_image().await.unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_capture_times_out_without_finger() {
        let (sensor, _handle) = ready_sensor().await;

        let err = sensor.capture_once(params(20)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_injected_failure_code() {
        let (sensor, handle) = ready_sensor().await;
        handle.fail_next_capture(-2034).unwrap();

        let err = sensor.capture_once(params(1000)).await.unwrap_err();
        assert_eq!(err.code(), -2034);
    }

    #[tokio::test]
    async fn test_begin_capture_reports_completion_event() {
        let (sensor, handle) = ready_sensor().await;
        let mut events = sensor.subscribe();

        handle.place_finger(vec![4, 5, 6], 88).unwrap();
        sensor.begin_capture(params(1000)).await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                DeviceEvent::CaptureCompleted { result, quality, nfiq } => {
                    assert_eq!(result, ResultCode::Success);
                    assert_eq!(quality, 88);
                    assert_eq!(nfiq, 1);
                    break;
                }
                DeviceEvent::Preview { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_suppresses_completion() {
        let (sensor, handle) = ready_sensor().await;
        let mut events = sensor.subscribe();

        sensor.begin_capture(params(60_000)).await.unwrap();
        sensor.cancel_capture().await.unwrap();
        assert_eq!(handle.cancel_requests(), 1);

        let received = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(received.is_err(), "no event expected after cancel");
    }

    #[tokio::test]
    async fn test_cancel_failure_is_one_shot() {
        let (sensor, handle) = ready_sensor().await;
        handle.fail_cancel(-2003);

        assert_eq!(sensor.cancel_capture().await.unwrap_err().code(), -2003);
        assert!(sensor.cancel_capture().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_aborts_pending_capture() {
        let (sensor, handle) = ready_sensor().await;
        let sensor = Arc::new(sensor);

        let waiting = {
            let sensor = Arc::clone(&sensor);
            tokio::spawn(async move { sensor.capture_once(CaptureParams::new(60, 60_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.disconnect();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(err.is_disconnected());
        assert!(!handle.is_initialized());
    }

    #[tokio::test]
    async fn test_disconnect_emits_detection_event() {
        let (sensor, handle) = MockSensor::with_name("MARC10");
        let mut events = sensor.subscribe();

        handle.disconnect();

        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::Detected {
                name: "MARC10".to_string(),
                state: ConnectionState::Disconnected,
            }
        );
    }

    #[tokio::test]
    async fn test_compare_uses_score_override() {
        let (sensor, handle) = ready_sensor().await;
        handle.set_score(vec![7, 7], 450);

        assert_eq!(sensor.compare_templates(&[1], &[7, 7]).await.unwrap(), 450);
        assert_eq!(sensor.compare_templates(&[1, 2], &[1, 2]).await.unwrap(), 1000);
        assert_eq!(sensor.compare_templates(&[1, 2], &[3, 4]).await.unwrap(), 0);
        assert_eq!(handle.compare_calls(), 3);
    }

    #[tokio::test]
    async fn test_template_failure_then_success() {
        let (sensor, handle) = ready_sensor().await;
        handle.place_finger(vec![1, 1], 90).unwrap();
        sensor.capture_once(params(1000)).await.unwrap();

        handle.fail_next_template(-2021);
        assert_eq!(sensor.fetch_template().await.unwrap_err().code(), -2021);
        assert_eq!(sensor.fetch_template().await.unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity(&[], &[1]), 0);
        assert_eq!(similarity(&[1, 2, 3, 4], &[1, 2, 0, 0]), 500);
        assert_eq!(similarity(&[1, 2], &[1, 2, 3, 4]), 500);
    }
}
