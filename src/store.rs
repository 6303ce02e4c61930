//! Remote data store: wire types, the [`DataStore`] seam, and the PostgREST client.
//!
//! Three resources are used:
//! - counts (create only): one [`DetectionRecord`] per detection
//! - plans (read only): [`Plan`] rows owned by the purchase backend
//! - execution counters (read, create, patch): one [`ExecutionCounter`] per plan

use crate::config::StoreConfig;
use crate::error::{AppResult, BridgeError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Identifier issued by the backend; numeric or textual (UUID) depending on the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer primary key
    Int(i64),
    /// Text or UUID primary key
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Row inserted into the counts resource for every detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Always 1; the backend sums rows
    pub count: u32,
    /// Unix time in seconds, with sub-second precision
    pub timestamp: f64,
}

impl DetectionRecord {
    /// The fixed-shape record for a detection observed at `at`.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            timestamp: at.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// A recurring-purchase plan. Read only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id
    pub id: RecordId,
    /// Display name
    #[serde(rename = "plan_name", default)]
    pub name: Option<String>,
    /// Owning user
    #[serde(rename = "user_id", default)]
    pub owner: Option<RecordId>,
    /// Whether detections should be applied to this plan
    #[serde(rename = "is_active", default)]
    pub active: bool,
}

impl Plan {
    /// Name for log output, falling back to the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("plan {}", self.id),
        }
    }
}

/// Per-plan tally of detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCounter {
    /// Plan this counter belongs to (unique)
    #[serde(rename = "dca_plan_id")]
    pub plan_id: RecordId,
    /// Running total
    #[serde(rename = "execution_count", default)]
    pub total: u64,
    /// Last increment time as stored by the backend; never interpreted here
    #[serde(rename = "last_executed_at", default)]
    pub last_updated: Option<String>,
}

/// Fields written when an existing counter is incremented.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterPatch {
    /// New running total
    #[serde(rename = "execution_count")]
    pub total: u64,
    /// Increment time, see [`format_timestamp`]
    #[serde(rename = "last_executed_at")]
    pub last_updated: String,
}

/// RFC 3339 UTC with microseconds, as PostgreSQL `timestamptz` prints it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Operations the bridge needs from the backend.
///
/// Implemented by [`RestStore`] in production and by in-memory recorders in tests.
pub trait DataStore {
    /// Create one detection record.
    fn insert_detection(&self, record: &DetectionRecord) -> AppResult<()>;

    /// All plans, active or not. Used only for diagnostics.
    fn all_plans(&self) -> AppResult<Vec<Plan>>;

    /// Plans whose active flag is set, in backend order.
    fn active_plans(&self) -> AppResult<Vec<Plan>>;

    /// The counter for `plan_id`, if one exists.
    fn find_counter(&self, plan_id: &RecordId) -> AppResult<Option<ExecutionCounter>>;

    /// Create a counter row.
    fn create_counter(&self, counter: &ExecutionCounter) -> AppResult<()>;

    /// Overwrite the total and timestamp of the counter for `plan_id`.
    fn update_counter(&self, plan_id: &RecordId, patch: &CounterPatch) -> AppResult<()>;
}

const PLAN_COLUMNS: &str = "id,plan_name,user_id,is_active";

/// Blocking PostgREST client (Supabase `/rest/v1`).
///
/// Every request carries the `apikey` header and the same key as bearer token, and
/// is bounded by the configured timeout.
pub struct RestStore {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    counts_table: String,
    plans_table: String,
    counters_table: String,
}

impl RestStore {
    /// Build a client from validated store settings.
    pub fn new(config: &StoreConfig) -> Self {
        let timeout = config.request_timeout();
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();

        Self {
            agent,
            base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            counts_table: config.counts_table.clone(),
            plans_table: config.plans_table.clone(),
            counters_table: config.counters_table.clone(),
        }
    }

    /// URL of a resource, e.g. `https://x.supabase.co/rest/v1/sensor_counts`.
    pub fn resource_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn request(&self, method: &str, table: &str) -> ureq::Request {
        self.agent
            .request(method, &self.resource_url(table))
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
    }

    fn send_json<T: Serialize>(
        &self,
        table: &str,
        request: ureq::Request,
        body: &T,
    ) -> AppResult<()> {
        let response = request
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|e| BridgeError::from_ureq(table, e))?;
        ensure_success(table, response).map(|_| ())
    }

    fn fetch<T: DeserializeOwned>(&self, table: &str, request: ureq::Request) -> AppResult<T> {
        trace!(resource = table, url = request.url(), "GET");
        let response = request
            .call()
            .map_err(|e| BridgeError::from_ureq(table, e))?;
        ensure_success(table, response)?
            .into_json()
            .map_err(|e| BridgeError::Decode {
                resource: table.to_string(),
                message: e.to_string(),
            })
    }
}

/// ureq reports 4xx/5xx as errors; redirects it could not follow still arrive here.
fn ensure_success(resource: &str, response: ureq::Response) -> AppResult<ureq::Response> {
    let status = response.status();
    if (200..=299).contains(&status) {
        Ok(response)
    } else {
        Err(BridgeError::HttpStatus {
            resource: resource.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        })
    }
}

fn eq_filter(id: &RecordId) -> String {
    format!("eq.{}", id)
}

impl DataStore for RestStore {
    fn insert_detection(&self, record: &DetectionRecord) -> AppResult<()> {
        let request = self
            .request("POST", &self.counts_table)
            .set("Prefer", "return=minimal");
        self.send_json(&self.counts_table, request, record)
    }

    fn all_plans(&self) -> AppResult<Vec<Plan>> {
        let request = self
            .request("GET", &self.plans_table)
            .query("select", PLAN_COLUMNS);
        self.fetch(&self.plans_table, request)
    }

    fn active_plans(&self) -> AppResult<Vec<Plan>> {
        let request = self
            .request("GET", &self.plans_table)
            .query("is_active", "eq.true")
            .query("select", PLAN_COLUMNS);
        let plans: Vec<Plan> = self.fetch(&self.plans_table, request)?;
        debug!(count = plans.len(), "Fetched active plans");
        Ok(plans)
    }

    fn find_counter(&self, plan_id: &RecordId) -> AppResult<Option<ExecutionCounter>> {
        let request = self
            .request("GET", &self.counters_table)
            .query("dca_plan_id", &eq_filter(plan_id))
            .query("select", "*");
        let rows: Vec<ExecutionCounter> = self.fetch(&self.counters_table, request)?;
        Ok(rows.into_iter().next())
    }

    fn create_counter(&self, counter: &ExecutionCounter) -> AppResult<()> {
        let request = self
            .request("POST", &self.counters_table)
            .set("Prefer", "return=representation");
        self.send_json(&self.counters_table, request, counter)
    }

    fn update_counter(&self, plan_id: &RecordId, patch: &CounterPatch) -> AppResult<()> {
        let request = self
            .request("PATCH", &self.counters_table)
            .query("dca_plan_id", &eq_filter(plan_id))
            .set("Prefer", "return=representation");
        self.send_json(&self.counters_table, request, patch)
    }
}
