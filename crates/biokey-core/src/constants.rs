//! Constants shared by the sensor adapter, the store and the session layer.
//!
//! The numeric result codes come from the vendor SDK that drives the
//! fingerprint sensor. Only the two sentinels the orchestration reacts to are
//! named here; every other non-zero code is passed through verbatim.
//!
//! # Usage
//!
//! ```
//! use biokey_core::constants::*;
//!
//! assert_eq!(DEFAULT_TARGET_SAMPLES, 10);
//! assert!(MATCH_THRESHOLD > 0);
//!
//! use std::time::Duration;
//! let timeout = Duration::from_millis(u64::from(DEFAULT_TIMEOUT_MS));
//! assert_eq!(timeout.as_secs(), 10);
//! ```

// ============================================================================
// Vendor Result Codes
// ============================================================================

/// Result code reported by the sensor when an operation succeeds.
pub const CODE_SUCCESS: i32 = 0;

/// Result code reported when no finger reached the requested quality before
/// the capture timeout expired.
///
/// Enrollment treats this as a transient condition and re-issues the capture
/// for the same finger slot.
pub const CODE_CAPTURE_TIMEOUT: i32 = -2019;

/// Result code reported when the sensor is unplugged or otherwise unreachable.
///
/// Always terminal for the session that observes it.
pub const CODE_DEVICE_NOT_CONNECTED: i32 = -2057;

/// Code reported for failures that carry no vendor code (I/O, malformed data).
pub const CODE_UNKNOWN: i32 = -1;

// ============================================================================
// Enrollment Defaults
// ============================================================================

/// Number of samples an enrollment session collects before completing.
pub const DEFAULT_TARGET_SAMPLES: u32 = 10;

/// Minimum acceptable capture quality passed to the sensor (0-100 scale).
pub const DEFAULT_MIN_QUALITY: u8 = 60;

/// Per-attempt capture timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// Highest quality score the sensor reports.
pub const MAX_QUALITY_SCORE: u8 = 100;

// ============================================================================
// Matching
// ============================================================================

/// Comparison score at or above which a stored record is accepted as a match.
///
/// The score scale is defined by the sensor's template comparison primitive.
/// A single global bound is applied; there is no per-record threshold.
///
/// # Examples
///
/// ```
/// use biokey_core::constants::MATCH_THRESHOLD;
///
/// let scores = [120, 450, 800];
/// let first = scores.iter().position(|s| *s >= MATCH_THRESHOLD);
/// assert_eq!(first, Some(1));
/// ```
pub const MATCH_THRESHOLD: i32 = 400;

// ============================================================================
// Record Identifiers
// ============================================================================

/// Prefix for generated sample record identifiers (`USER_001`, `USER_002`, ...).
pub const RECORD_ID_PREFIX: &str = "USER_";
