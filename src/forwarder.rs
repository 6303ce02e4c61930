//! Detection forwarder: one counts insert per detection.

use crate::error::AppResult;
use crate::line::Detection;
use crate::store::{DataStore, DetectionRecord};
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Insert the fixed-shape record for `detection` observed at `at`.
///
/// No retry. On failure the caller must skip the plan updates for this event.
pub fn forward_detection<S: DataStore + ?Sized>(
    store: &S,
    detection: &Detection,
    at: DateTime<Utc>,
) -> AppResult<DetectionRecord> {
    let record = DetectionRecord::at(at);
    match store.insert_detection(&record) {
        Ok(()) => {
            info!(
                count = detection.count,
                time_ms = detection.time_ms,
                "Detection record inserted"
            );
            Ok(record)
        }
        Err(e) => {
            error!(count = detection.count, error = %e, "Detection record insert failed");
            Err(e)
        }
    }
}
