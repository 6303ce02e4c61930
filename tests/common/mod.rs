//! Shared test doubles.
//!
//! `RecordingStore` is an in-memory `DataStore` that:
//! - keeps counters in memory so increments can be observed
//! - logs every call for verification
//! - injects failures per operation or per plan

#![allow(dead_code)]

use counter_bridge::error::{AppResult, BridgeError};
use counter_bridge::store::{
    CounterPatch, DataStore, DetectionRecord, ExecutionCounter, Plan, RecordId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn plan(id: i64, name: &str) -> Plan {
    Plan {
        id: RecordId::Int(id),
        name: Some(name.to_string()),
        owner: Some(RecordId::from("user-1")),
        active: true,
    }
}

pub fn counter(plan_id: i64, total: u64) -> ExecutionCounter {
    ExecutionCounter {
        plan_id: RecordId::Int(plan_id),
        total,
        last_updated: None,
    }
}

fn server_error(resource: &str) -> BridgeError {
    BridgeError::HttpStatus {
        resource: resource.to_string(),
        status: 500,
        body: "injected failure".to_string(),
    }
}

#[derive(Default)]
pub struct RecordingStore {
    plans: Vec<Plan>,
    counters: Mutex<Vec<ExecutionCounter>>,
    inserted: Mutex<Vec<DetectionRecord>>,
    call_log: Mutex<Vec<String>>,
    fail_insert: AtomicBool,
    fail_plans: AtomicBool,
    fail_all_plans: AtomicBool,
    failing_plans: Mutex<HashSet<RecordId>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(mut self, plans: Vec<Plan>) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_counter(self, counter: ExecutionCounter) -> Self {
        self.counters.lock().unwrap().push(counter);
        self
    }

    pub fn fail_insert(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_plans(&self) {
        self.fail_plans.store(true, Ordering::SeqCst);
    }

    pub fn fail_all_plans(&self) {
        self.fail_all_plans.store(true, Ordering::SeqCst);
    }

    /// Every counter operation for this plan fails.
    pub fn fail_plan(&self, id: i64) {
        self.failing_plans.lock().unwrap().insert(RecordId::Int(id));
    }

    pub fn calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn calls_named(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Counter lookups, i.e. increment attempts.
    pub fn increment_attempts(&self) -> usize {
        self.calls_named("find_counter")
    }

    pub fn inserted(&self) -> Vec<DetectionRecord> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn total_for(&self, id: i64) -> Option<u64> {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.plan_id == RecordId::Int(id))
            .map(|c| c.total)
    }

    fn log_call(&self, call: String) {
        self.call_log.lock().unwrap().push(call);
    }

    fn plan_fails(&self, id: &RecordId) -> bool {
        self.failing_plans.lock().unwrap().contains(id)
    }
}

impl DataStore for RecordingStore {
    fn insert_detection(&self, record: &DetectionRecord) -> AppResult<()> {
        self.log_call("insert_detection".to_string());
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(server_error("sensor_counts"));
        }
        self.inserted.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn all_plans(&self) -> AppResult<Vec<Plan>> {
        self.log_call("all_plans".to_string());
        if self.fail_all_plans.load(Ordering::SeqCst) {
            return Err(server_error("dca_plans"));
        }
        Ok(self.plans.clone())
    }

    fn active_plans(&self) -> AppResult<Vec<Plan>> {
        self.log_call("active_plans".to_string());
        if self.fail_plans.load(Ordering::SeqCst) {
            return Err(server_error("dca_plans"));
        }
        // Server-side filtering is not emulated; the updater must re-check.
        Ok(self.plans.clone())
    }

    fn find_counter(&self, plan_id: &RecordId) -> AppResult<Option<ExecutionCounter>> {
        self.log_call(format!("find_counter:{}", plan_id));
        if self.plan_fails(plan_id) {
            return Err(server_error("dca_execution_counts"));
        }
        Ok(self
            .counters
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.plan_id == plan_id)
            .cloned())
    }

    fn create_counter(&self, counter: &ExecutionCounter) -> AppResult<()> {
        self.log_call(format!("create_counter:{}={}", counter.plan_id, counter.total));
        self.counters.lock().unwrap().push(counter.clone());
        Ok(())
    }

    fn update_counter(&self, plan_id: &RecordId, patch: &CounterPatch) -> AppResult<()> {
        self.log_call(format!("update_counter:{}={}", plan_id, patch.total));
        let mut counters = self.counters.lock().unwrap();
        if let Some(existing) = counters.iter_mut().find(|c| &c.plan_id == plan_id) {
            existing.total = patch.total;
            existing.last_updated = Some(patch.last_updated.clone());
        }
        Ok(())
    }
}
