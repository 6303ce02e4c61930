//! # Counter Bridge
//!
//! Bridges a TCRT5000 object counter (ESP32 firmware printing over USB serial) to a
//! PostgREST data store. Every detection line inserts one row into the counts
//! resource and then bumps the execution counter of every active recurring-purchase
//! plan.
//!
//! ## Crate Structure
//!
//! - **`line`**: Permissive decoding and stateless classification of device lines.
//! - **`serial`**: Port discovery, opening, and timeout-tolerant line framing.
//! - **`store`**: Wire types, the `DataStore` trait, and the blocking REST client.
//! - **`forwarder`**: The counts insert for one detection.
//! - **`updater`**: Fetch-or-create and increment of per-plan execution counters.
//! - **`monitor`**: The read-classify-dispatch loop tying the above together.
//! - **`config`**: Layered configuration from TOML and the environment (`figment`).
//! - **`tracing_init`**: Structured logging setup.
//! - **`error`**: The `BridgeError` enum.

pub mod config;
pub mod error;
pub mod forwarder;
pub mod line;
pub mod monitor;
pub mod serial;
pub mod store;
pub mod tracing_init;
pub mod updater;

pub use error::{AppResult, BridgeError};
pub use line::{classify, Detection, SensorLine};
pub use monitor::{EventOutcome, LineOutcome, Monitor, MonitorStats};
pub use store::{DataStore, RestStore};
