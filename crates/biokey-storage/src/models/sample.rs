use biokey_core::constants::{MAX_QUALITY_SCORE, RECORD_ID_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Format a row id as a record identifier (`USER_001`).
///
/// # Examples
///
/// ```
/// use biokey_storage::models::format_record_id;
///
/// assert_eq!(format_record_id(1), "USER_001");
/// assert_eq!(format_record_id(1234), "USER_1234");
/// ```
pub fn format_record_id(id: i64) -> String {
    format!("{RECORD_ID_PREFIX}{id:03}")
}

/// Parse a record identifier back into its row id.
///
/// # Examples
///
/// ```
/// use biokey_storage::models::parse_record_id;
///
/// assert_eq!(parse_record_id("USER_007"), Some(7));
/// assert_eq!(parse_record_id("ADMIN_007"), None);
/// assert_eq!(parse_record_id("USER_"), None);
/// ```
pub fn parse_record_id(record_id: &str) -> Option<i64> {
    record_id
        .strip_prefix(RECORD_ID_PREFIX)?
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

/// A sample ready to be persisted.
///
/// Built from a successful capture. The image is optional because fetching it
/// is best-effort; the template is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSample {
    /// Finger slot (1-based) the sample was captured for.
    pub finger_index: u32,
    pub template: Vec<u8>,
    pub image: Option<Vec<u8>>,
    pub quality: u8,
    pub nfiq: u8,
    pub created_at: DateTime<Utc>,
}

impl NewSample {
    /// Create a sample stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty template, a zero finger index,
    /// or a quality above 100.
    pub fn new(
        finger_index: u32,
        template: Vec<u8>,
        image: Option<Vec<u8>>,
        quality: u8,
        nfiq: u8,
    ) -> StorageResult<Self> {
        if template.is_empty() {
            return Err(StorageError::Validation("Template is empty".to_string()));
        }
        if finger_index == 0 {
            return Err(StorageError::Validation(
                "Finger index starts at 1".to_string(),
            ));
        }
        if quality > MAX_QUALITY_SCORE {
            return Err(StorageError::Validation(format!(
                "Quality {quality} exceeds {MAX_QUALITY_SCORE}"
            )));
        }

        Ok(Self {
            finger_index,
            template,
            image,
            quality,
            nfiq,
            created_at: Utc::now(),
        })
    }
}

/// A stored sample without its image, as returned by the matching scan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateRecord {
    /// Auto-increment primary key.
    pub id: i64,
    pub finger_index: i64,
    pub template: Vec<u8>,
    pub quality: i64,
    pub nfiq: i64,
    pub created_at: DateTime<Utc>,
}

impl TemplateRecord {
    pub fn record_id(&self) -> String {
        format_record_id(self.id)
    }
}

/// A complete stored sample including the raw image.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SampleRecord {
    /// Auto-increment primary key.
    pub id: i64,

    /// Finger slot (1-based) within the enrollment session.
    pub finger_index: i64,

    /// Feature template (format defined by the sensor vendor).
    pub template: Vec<u8>,

    /// Raw image, absent when the image fetch failed during enrollment.
    pub image: Option<Vec<u8>>,

    /// Sensor quality score (0-100).
    pub quality: i64,

    /// NFIQ score (1-5, lower is better).
    pub nfiq: i64,

    pub created_at: DateTime<Utc>,
}

impl SampleRecord {
    pub fn record_id(&self) -> String {
        format_record_id(self.id)
    }

    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|image| !image.is_empty())
    }
}
