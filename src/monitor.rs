//! The monitoring loop: read a line, classify it, dispatch detections.
//!
//! Everything here runs on one thread. Per-event failures are logged and the loop
//! moves on; only serial failures end it.

use crate::error::{AppResult, BridgeError};
use crate::forwarder::forward_detection;
use crate::line::{classify, decode_line, Detection, SensorLine};
use crate::serial::{LineReader, ReadOutcome};
use crate::store::DataStore;
use crate::updater::{PlanUpdater, UpdateSummary};
use chrono::Utc;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Log target for verbatim device output.
pub const SERIAL_LOG_TARGET: &str = "counter_bridge::serial";

/// Result of processing one detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The counts insert failed; no plan was touched
    InsertFailed,
    /// The record was inserted but the active plans could not be fetched
    PlansUnavailable,
    /// The record was inserted and counters were updated as summarized
    Applied(UpdateSummary),
}

/// Result of processing one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Ready or starting announcement
    Announcement(SensorLine),
    /// A detection and what became of it
    Detection(Detection, EventOutcome),
    /// Plain device output
    Passthrough,
}

/// Running totals, returned when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Non-empty lines decoded
    pub lines: u64,
    /// Lines with only whitespace
    pub blank: u64,
    /// Lines with bytes but no decodable text
    pub skipped: u64,
    /// Detection lines seen
    pub detections: u64,
    /// Detections whose record was inserted
    pub recorded: u64,
}

/// Drives the pipeline for every line from the sensor.
pub struct Monitor<S: DataStore> {
    store: S,
    log_all_plans: bool,
    stop: Arc<AtomicBool>,
    stats: MonitorStats,
}

impl<S: DataStore> Monitor<S> {
    /// Monitor writing to `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            log_all_plans: false,
            stop: Arc::new(AtomicBool::new(false)),
            stats: MonitorStats::default(),
        }
    }

    /// Log every plan before each update (diagnostic).
    pub fn with_all_plans_logged(mut self, enabled: bool) -> Self {
        self.log_all_plans = enabled;
        self
    }

    /// Flag that, once set, ends [`Monitor::run`] after the current read.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Totals so far.
    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read lines until stopped or the serial link fails.
    ///
    /// Returns `Ok` when stopped through [`Monitor::stop_handle`]. End of stream is
    /// [`BridgeError::SerialDisconnected`].
    pub fn run<R: Read>(&mut self, reader: &mut LineReader<R>) -> AppResult<MonitorStats> {
        info!("Waiting for sensor output");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!(
                    lines = self.stats.lines,
                    detections = self.stats.detections,
                    recorded = self.stats.recorded,
                    "Monitor stopped"
                );
                return Ok(self.stats);
            }

            match reader.read_line()? {
                ReadOutcome::Line(raw) => match decode_line(&raw) {
                    Some(text) => {
                        self.handle_line(&text);
                    }
                    None if raw.iter().all(u8::is_ascii_whitespace) => {
                        self.stats.blank += 1;
                    }
                    None => {
                        self.stats.skipped += 1;
                        debug!(bytes = raw.len(), "Skipping undecodable serial line");
                    }
                },
                ReadOutcome::Idle => continue,
                ReadOutcome::Closed => {
                    error!("Serial stream closed by device");
                    return Err(BridgeError::SerialDisconnected);
                }
            }
        }
    }

    /// Log a decoded line and act on it.
    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.stats.lines += 1;
        info!(target: SERIAL_LOG_TARGET, "{}", line);

        match classify(line) {
            SensorLine::Detection(detection) => {
                let outcome = self.handle_detection(detection);
                LineOutcome::Detection(detection, outcome)
            }
            SensorLine::Ready => {
                info!("Counter ready");
                LineOutcome::Announcement(SensorLine::Ready)
            }
            SensorLine::Starting => {
                info!("Counter starting");
                LineOutcome::Announcement(SensorLine::Starting)
            }
            SensorLine::Other => LineOutcome::Passthrough,
        }
    }

    /// Insert the detection record, then update every active plan's counter.
    pub fn handle_detection(&mut self, detection: Detection) -> EventOutcome {
        self.stats.detections += 1;
        info!(
            count = detection.count,
            time_ms = detection.time_ms,
            "Object detected"
        );

        let at = Utc::now();
        if forward_detection(&self.store, &detection, at).is_err() {
            return EventOutcome::InsertFailed;
        }
        self.stats.recorded += 1;

        let updater = PlanUpdater::new(&self.store).with_all_plans_logged(self.log_all_plans);
        match updater.run(at) {
            Ok(summary) => EventOutcome::Applied(summary),
            Err(e) => {
                error!(error = %e, "Could not fetch active plans");
                EventOutcome::PlansUnavailable
            }
        }
    }
}
