//! Subcommand implementations.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use biokey_core::CaptureMode;
use biokey_hardware::AnyCaptureDevice;
use biokey_hardware::mock::{MockSensor, MockSensorHandle};
use biokey_session::{CaptureConfig, MatchOutcome, SessionController, StatusEvent};
use biokey_storage::{Database, SqliteTemplateStore, TemplateStore};
use tokio::signal;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::simulator;

const DETECTION_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn open_store(config: &AppConfig) -> Result<(Database, SqliteTemplateStore)> {
    let db = Database::new(config.database.to_database_config())
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;
    let store = SqliteTemplateStore::new(db.pool().clone());
    Ok((db, store))
}

/// Controller over a mock sensor that has announced itself and been
/// initialized.
async fn connect(
    capture: CaptureConfig,
    store: SqliteTemplateStore,
) -> Result<(SessionController, MockSensorHandle)> {
    let (sensor, handle) = MockSensor::new();
    let controller = SessionController::new(AnyCaptureDevice::from(sensor), store, capture)?;

    handle.announce();
    let detected = tokio::time::timeout(
        DETECTION_TIMEOUT,
        controller.wait_until(|s| s.detected_model.is_some()),
    )
    .await;
    if detected.is_err() {
        warn!("Sensor did not announce itself, using the configured model");
    }

    let info = controller.initialize().await?;
    info!(device = %info.name, serial = ?info.serial_number, "Sensor ready");
    Ok((controller, handle))
}

pub async fn enroll(config: &AppConfig, mode: CaptureMode, first_finger: u32) -> Result<()> {
    let (db, store) = open_store(config).await?;
    let (controller, sensor) = connect(config.capture.clone(), store.clone()).await?;
    simulator::place_fingers(&sensor, first_finger, config.capture.target_samples)?;

    let mut status = controller.subscribe_status();
    controller.start_enrollment(mode).await?;

    let mut stopping = false;
    let last = loop {
        let current = status.borrow_and_update().clone();
        println!("{current}");
        if current.phase.is_terminal() {
            break current;
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    bail!("controller stopped during enrollment");
                }
            }
            _ = signal::ctrl_c(), if !stopping => {
                info!("Interrupted, stopping enrollment");
                stopping = true;
                controller.stop().await?;
            }
        }
    };

    controller.shutdown().await?;
    db.close().await;

    match last.event {
        StatusEvent::Completed | StatusEvent::Stopped => {
            println!("Enrolled {} of {} samples", last.captured, last.target);
            Ok(())
        }
        event => bail!("enrollment ended early: {event}"),
    }
}

pub async fn identify(config: &AppConfig, finger: u32) -> Result<()> {
    let (db, store) = open_store(config).await?;
    let (controller, sensor) = connect(config.capture.clone(), store).await?;
    sensor.place_finger(
        simulator::synthetic_template(finger),
        simulator::synthetic_quality(finger),
    )?;

    let outcome = controller.start_match().await;
    controller.shutdown().await?;
    db.close().await;

    match outcome? {
        MatchOutcome::Matched {
            record_id,
            score,
            checked,
            ..
        } => println!("Match: {record_id} (score {score}, {checked} records checked)"),
        MatchOutcome::NoMatch { checked, .. } => {
            println!("No match ({checked} records checked)");
        }
    }
    Ok(())
}

pub async fn count(config: &AppConfig) -> Result<()> {
    let (db, store) = open_store(config).await?;
    println!("{}", store.count().await?);
    db.close().await;
    Ok(())
}

pub async fn clear(config: &AppConfig) -> Result<()> {
    let (db, store) = open_store(config).await?;
    let deleted = store.delete_all().await?;
    println!("Deleted {deleted} records");
    db.close().await;
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<()> {
    let (db, store) = open_store(config).await?;
    let records = store.list_all().await?;
    for record in &records {
        println!(
            "{}  finger {:>2}  quality {:>3}  nfiq {}  {}",
            record.record_id(),
            record.finger_index,
            record.quality,
            record.nfiq,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!("{} records", records.len());
    db.close().await;
    Ok(())
}
