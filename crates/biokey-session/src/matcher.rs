//! One-to-many identification against the template store.
//!
//! A match captures one probe finger, then compares its template against every
//! stored record in insertion order and stops at the first score that reaches
//! the threshold. An empty store is rejected before the sensor is touched.

use biokey_core::{Error, Result};
use biokey_hardware::{CaptureDevice, CaptureParams, CaptureQuality};
use biokey_storage::TemplateStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// First record whose score reached the threshold.
    Matched {
        record_id: String,
        score: i32,
        /// Records compared, the matching one included.
        checked: usize,
        quality: CaptureQuality,
    },

    /// No record reached the threshold.
    NoMatch {
        checked: usize,
        quality: CaptureQuality,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Matched { record_id, .. } => Some(record_id),
            Self::NoMatch { .. } => None,
        }
    }

    pub fn checked(&self) -> usize {
        match self {
            Self::Matched { checked, .. } | Self::NoMatch { checked, .. } => *checked,
        }
    }
}

/// Linear matcher with early exit.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    params: CaptureParams,
    threshold: i32,
}

impl Matcher {
    pub fn new(params: CaptureParams, threshold: i32) -> Self {
        Self { params, threshold }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Capture a probe and scan the store.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyStore`] when nothing is enrolled; no capture is issued
    /// - capture and template errors from the sensor
    /// - [`Error::DeviceDisconnected`] if the sensor goes away mid-scan
    /// - [`Error::PersistenceFailure`] if the store cannot be read
    ///
    /// Any other comparison failure skips that record.
    pub async fn run<D, S>(&self, device: &D, store: &S) -> Result<MatchOutcome>
    where
        D: CaptureDevice,
        S: TemplateStore,
    {
        if store.count().await? == 0 {
            return Err(Error::EmptyStore);
        }

        let quality = device.capture_once(self.params).await?;
        let probe = device.fetch_template().await?;
        let records = store.list_all().await?;
        debug!(records = records.len(), quality = quality.quality, "Scanning store");

        let mut checked = 0;
        for record in &records {
            let score = match device.compare_templates(&probe, &record.template).await {
                Ok(score) => score,
                Err(err) if err.is_disconnected() => return Err(err.into()),
                Err(err) => {
                    checked += 1;
                    warn!(record_id = %record.record_id(), error = %err, "Comparison failed, skipping record");
                    continue;
                }
            };
            checked += 1;

            if score >= self.threshold {
                let record_id = record.record_id();
                info!(%record_id, score, checked, "Fingerprint matched");
                return Ok(MatchOutcome::Matched {
                    record_id,
                    score,
                    checked,
                    quality,
                });
            }
        }

        info!(checked, "No matching fingerprint");
        Ok(MatchOutcome::NoMatch { checked, quality })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biokey_core::DeviceModel;
    use biokey_hardware::mock::{MockSensor, MockSensorHandle};
    use biokey_storage::models::NewSample;
    use biokey_storage::{Database, SqliteTemplateStore};

    async fn setup(templates: &[&[u8]]) -> (MockSensor, MockSensorHandle, SqliteTemplateStore) {
        let (sensor, handle) = MockSensor::new();
        sensor.initialize(DeviceModel::Mfs500, None).await.unwrap();

        let db = Database::in_memory().await.unwrap();
        let store = SqliteTemplateStore::new(db.pool().clone());
        for (i, template) in templates.iter().enumerate() {
            let slot = u32::try_from(i).unwrap() + 1;
            store
                .save(NewSample::new(slot, template.to_vec(), None, 80, 1).unwrap())
                .await
                .unwrap();
        }
        (sensor, handle, store)
    }

    fn matcher() -> Matcher {
        Matcher::new(CaptureParams::new(60, 5_000), 400)
    }

    #[tokio::test]
    async fn test_first_record_above_threshold_wins() {
        let (sensor, handle, store) = setup(&[&[1], &[2], &[3]]).await;
        handle.set_score(vec![1], 120);
        handle.set_score(vec![2], 450);
        handle.set_score(vec![3], 800);
        handle.place_finger(vec![9, 9, 9], 85).unwrap();

        let outcome = matcher().run(&sensor, &store).await.unwrap();

        assert_eq!(outcome.record_id(), Some("USER_002"));
        assert_eq!(outcome.checked(), 2);
        assert!(matches!(outcome, MatchOutcome::Matched { score: 450, .. }));
        assert_eq!(handle.compare_calls(), 2);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let (sensor, handle, store) = setup(&[&[1]]).await;
        handle.set_score(vec![1], 400);
        handle.place_finger(vec![9], 85).unwrap();

        let outcome = matcher().run(&sensor, &store).await.unwrap();
        assert!(outcome.is_match());
    }

    #[tokio::test]
    async fn test_no_match_checks_every_record() {
        let (sensor, handle, store) = setup(&[&[1], &[2], &[3]]).await;
        for reference in [1u8, 2, 3] {
            handle.set_score(vec![reference], 399);
        }
        handle.place_finger(vec![9], 85).unwrap();

        let outcome = matcher().run(&sensor, &store).await.unwrap();

        assert!(!outcome.is_match());
        assert_eq!(outcome.checked(), 3);
        assert_eq!(handle.compare_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_store_skips_capture() {
        let (sensor, handle, store) = setup(&[]).await;

        let err = matcher().run(&sensor, &store).await.unwrap_err();

        assert!(matches!(err, Error::EmptyStore));
        assert_eq!(handle.capture_requests(), 0);
    }

    #[tokio::test]
    async fn test_capture_failure_propagates() {
        let (sensor, handle, store) = setup(&[&[1]]).await;
        handle.fail_next_capture(-2034).unwrap();

        let err = matcher().run(&sensor, &store).await.unwrap_err();

        assert_eq!(err.code(), Some(-2034));
        assert_eq!(handle.compare_calls(), 0);
    }

    #[tokio::test]
    async fn test_comparison_failure_skips_record() {
        let (sensor, handle, store) = setup(&[&[1], &[2]]).await;
        handle.fail_next_compare(-2100);
        handle.set_score(vec![2], 700);
        handle.place_finger(vec![9], 85).unwrap();

        let outcome = matcher().run(&sensor, &store).await.unwrap();

        assert_eq!(outcome.record_id(), Some("USER_002"));
        assert_eq!(outcome.checked(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_during_compare_aborts() {
        let (sensor, handle, store) = setup(&[&[1], &[2]]).await;
        handle.fail_next_compare(-2057);
        handle.place_finger(vec![9], 85).unwrap();

        let err = matcher().run(&sensor, &store).await.unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(handle.compare_calls(), 1);
    }
}
