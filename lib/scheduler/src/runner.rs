//! The schedule loop.
//!
//! Periodically scans active workflows that carry a cron schedule and
//! fires the ones that came due since the previous tick. Fire failures
//! are logged, never fatal: one broken workflow must not stall the loop.

use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use flowline_engine::dispatcher::{DispatchOutcome, Dispatcher, FireRequest};
use flowline_engine::store::WorkflowStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval between schedule scans.
pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Fires scheduled workflows through the dispatcher.
pub struct Scheduler {
    workflows: Arc<dyn WorkflowStore>,
    dispatcher: Arc<Dispatcher>,
    tick: Duration,
}

impl Scheduler {
    /// Creates a scheduler that scans at the given interval.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        dispatcher: Arc<Dispatcher>,
        tick: Duration,
    ) -> Self {
        Self {
            workflows,
            dispatcher,
            tick,
        }
    }

    /// Runs the schedule loop forever.
    pub async fn run(self) {
        info!(tick_secs = self.tick.as_secs(), "schedule loop started");
        let mut interval = tokio::time::interval(self.tick);
        // The first tick of a tokio interval completes immediately
        interval.tick().await;

        let mut window_start = Utc::now();
        loop {
            interval.tick().await;
            let now = Utc::now();
            self.tick_once(window_start, now).await;
            window_start = now;
        }
    }

    /// Fires every workflow whose schedule came due in
    /// `(window_start, now]`. Returns how many fires were started.
    pub async fn tick_once(&self, window_start: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let scheduled = match self.workflows.list_scheduled().await {
            Ok(scheduled) => scheduled,
            Err(store_error) => {
                warn!(%store_error, "failed to scan scheduled workflows");
                return 0;
            }
        };

        let mut started = 0;
        for workflow in scheduled {
            let Some(expression) = &workflow.schedule else {
                continue;
            };
            let schedule = CronSchedule::new(expression);

            let due = match schedule.next_after(window_start) {
                Some(next) => next <= now,
                None => {
                    warn!(
                        workflow_id = %workflow.id,
                        schedule = %expression,
                        "workflow schedule is invalid or never fires"
                    );
                    continue;
                }
            };
            if !due {
                continue;
            }

            match self
                .dispatcher
                .fire(workflow.id, FireRequest::schedule())
                .await
            {
                Ok(DispatchOutcome::Started(execution_id)) => {
                    info!(workflow_id = %workflow.id, %execution_id, "scheduled fire started");
                    started += 1;
                }
                Ok(DispatchOutcome::Suppressed) => {
                    debug!(workflow_id = %workflow.id, "scheduled fire suppressed");
                }
                Err(dispatch_error) => {
                    warn!(workflow_id = %workflow.id, %dispatch_error, "scheduled fire failed");
                }
            }
        }
        started
    }
}
