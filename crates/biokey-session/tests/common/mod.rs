//! Shared fixtures for controller integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use biokey_core::DeviceModel;
use biokey_hardware::mock::{MockSensor, MockSensorHandle};
use biokey_session::{CaptureConfig, SessionController, SessionStatus};
use biokey_storage::models::{NewSample, SampleRecord, TemplateRecord};
use biokey_storage::{Database, SqliteTemplateStore, StorageError, StorageResult, TemplateStore};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub controller: SessionController,
    pub sensor: MockSensorHandle,
    pub store: SqliteTemplateStore,
    _db: Database,
}

/// Captures never time out on their own; tests queue timeouts explicitly.
pub fn config() -> CaptureConfig {
    CaptureConfig::default()
        .with_timeout_ms(60_000)
        .with_device_model(DeviceModel::Mfs500)
}

/// Same, but the model must come from a detection event.
pub fn config_without_model() -> CaptureConfig {
    CaptureConfig::default().with_timeout_ms(60_000)
}

pub async fn harness(config: CaptureConfig) -> Harness {
    let (sensor, handle) = MockSensor::new();
    harness_with_sensor(sensor, handle, config).await
}

pub async fn harness_with_sensor(
    sensor: MockSensor,
    handle: MockSensorHandle,
    config: CaptureConfig,
) -> Harness {
    let db = Database::in_memory().await.unwrap();
    let store = SqliteTemplateStore::new(db.pool().clone());
    let controller = SessionController::new(sensor, store.clone(), config).unwrap();

    Harness {
        controller,
        sensor: handle,
        store,
        _db: db,
    }
}

/// Harness with an initialized sensor.
pub async fn ready(config: CaptureConfig) -> Harness {
    let harness = harness(config).await;
    harness.controller.initialize().await.unwrap();
    harness
}

pub async fn wait(
    controller: &SessionController,
    predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    tokio::time::timeout(WAIT, controller.wait_until(predicate))
        .await
        .expect("status not reached in time")
        .unwrap()
}

/// Queue `count` distinct fingers with rising quality.
pub fn place_fingers(sensor: &MockSensorHandle, count: u8) {
    for i in 1..=count {
        sensor.place_finger(template(i), 60 + i).unwrap();
    }
}

pub fn template(seed: u8) -> Vec<u8> {
    vec![seed; 16]
}

/// Store whose first `failures` saves fail.
pub struct FlakyStore {
    inner: SqliteTemplateStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteTemplateStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

impl TemplateStore for FlakyStore {
    async fn save(&self, sample: NewSample) -> StorageResult<String> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Internal("disk full".to_string()));
        }
        self.inner.save(sample).await
    }

    async fn list_all(&self) -> StorageResult<Vec<TemplateRecord>> {
        self.inner.list_all().await
    }

    async fn count(&self) -> StorageResult<u64> {
        self.inner.count().await
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        self.inner.delete_all().await
    }

    async fn find(&self, record_id: &str) -> StorageResult<Option<SampleRecord>> {
        self.inner.find(record_id).await
    }
}
