//! Plan updater: bump the execution counter of every active plan.
//!
//! Plans are handled one at a time in the order the backend returns them. A failure
//! on one plan is recorded in the [`UpdateSummary`] and the next plan is tried;
//! nothing is retried or rolled back.

use crate::error::AppResult;
use crate::store::{format_timestamp, CounterPatch, DataStore, ExecutionCounter, Plan, RecordId};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// What happened to one plan's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterChange {
    /// No counter existed; one was created with total 1
    Created,
    /// An existing counter moved from `previous` to `current`
    Incremented {
        /// Total before this detection
        previous: u64,
        /// Total written back
        current: u64,
    },
}

/// A plan whose counter could not be updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFailure {
    /// Plan id
    pub plan_id: RecordId,
    /// Human-readable cause
    pub reason: String,
}

/// Per-event tally of counter updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Active plans an increment was attempted for
    pub attempted: usize,
    /// Increments that were written
    pub succeeded: usize,
    /// Plans that failed, in processing order
    pub failures: Vec<PlanFailure>,
}

impl UpdateSummary {
    /// True when every attempted plan was updated.
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies one detection to the execution counters of all active plans.
pub struct PlanUpdater<'a, S: DataStore + ?Sized> {
    store: &'a S,
    log_all_plans: bool,
}

impl<'a, S: DataStore + ?Sized> PlanUpdater<'a, S> {
    /// Updater over `store`.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            log_all_plans: false,
        }
    }

    /// Also fetch and log every plan before the active fetch.
    pub fn with_all_plans_logged(mut self, enabled: bool) -> Self {
        self.log_all_plans = enabled;
        self
    }

    /// Fetch active plans and increment each one's counter.
    ///
    /// Errors only when the active plan list cannot be fetched.
    pub fn run(&self, at: DateTime<Utc>) -> AppResult<UpdateSummary> {
        if self.log_all_plans {
            self.log_plans();
        }

        let plans: Vec<Plan> = self
            .store
            .active_plans()?
            .into_iter()
            .filter(|plan| plan.active)
            .collect();

        let mut summary = UpdateSummary::default();
        if plans.is_empty() {
            info!("No active plans to update");
            return Ok(summary);
        }
        info!(count = plans.len(), "Updating active plan counters");

        for plan in &plans {
            summary.attempted += 1;
            match self.increment(plan, at) {
                Ok(CounterChange::Created) => {
                    summary.succeeded += 1;
                    info!(plan_id = %plan.id, plan = %plan.label(), current = 1, "Counter created");
                }
                Ok(CounterChange::Incremented { previous, current }) => {
                    summary.succeeded += 1;
                    info!(plan_id = %plan.id, plan = %plan.label(), previous, current, "Counter incremented");
                }
                Err(e) => {
                    warn!(plan_id = %plan.id, plan = %plan.label(), error = %e, "Counter update failed");
                    summary.failures.push(PlanFailure {
                        plan_id: plan.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            attempted = summary.attempted,
            "Updated {}/{} plan counters",
            summary.succeeded,
            summary.attempted
        );
        Ok(summary)
    }

    /// Increment the counter of one plan, creating it on first use.
    ///
    /// A failed lookup is an error, not an absent counter, so no duplicate row is
    /// created when the backend is unreachable.
    pub fn increment(&self, plan: &Plan, at: DateTime<Utc>) -> AppResult<CounterChange> {
        match self.store.find_counter(&plan.id)? {
            Some(existing) => {
                let previous = existing.total;
                let current = previous.saturating_add(1);
                self.store.update_counter(
                    &plan.id,
                    &CounterPatch {
                        total: current,
                        last_updated: format_timestamp(at),
                    },
                )?;
                Ok(CounterChange::Incremented { previous, current })
            }
            None => {
                self.store.create_counter(&ExecutionCounter {
                    plan_id: plan.id.clone(),
                    total: 1,
                    last_updated: Some(format_timestamp(at)),
                })?;
                Ok(CounterChange::Created)
            }
        }
    }

    fn log_plans(&self) {
        match self.store.all_plans() {
            Ok(plans) => {
                debug!(count = plans.len(), "All plans in store");
                for plan in &plans {
                    debug!(
                        plan_id = %plan.id,
                        plan = %plan.label(),
                        owner = ?plan.owner,
                        active = plan.active,
                        "Plan"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Could not list all plans"),
        }
    }
}
