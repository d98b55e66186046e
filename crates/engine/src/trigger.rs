//! Trigger manager.
//!
//! Turns a workflow's trigger into queue work:
//! - `manual` / `webhook` → one pending execution plus one immediate job.
//! - `schedule` → a cron registration keyed by workflow id. Every tick
//!   enqueues a job for a fresh execution; the execution returned by
//!   [`TriggerManager::schedule`] is the one the first tick uses.
//!
//! Registrations are owned here as [`ScheduledRegistration`] records, so
//! they can be listed and cancelled without asking the scheduler what it
//! holds. At most one registration exists per workflow.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use queue::{EnqueueOptions, ExecutionQueue};

use crate::models::{Execution, ExecutionStatus, JobPayload, Trigger, Workflow};
use crate::store::ExecutionStore;
use crate::validate::{validate_actions, validate_cron};
use crate::EngineError;

const CANCELLED_BEFORE_FIRST_RUN: &str = "schedule cancelled before first run";
const STOPPED_BEFORE_FIRST_RUN: &str = "scheduler stopped before first run";

/// A live cron registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRegistration {
    pub workflow_id: Uuid,
    /// The five-field expression as written in the workflow.
    pub cron_expr: String,
    /// Scheduler job id; removing it stops the ticks.
    pub registration_key: Uuid,
    pub registered_at: DateTime<Utc>,
}

struct LiveRegistration {
    info: ScheduledRegistration,
    /// Definition the ticks enqueue.
    snapshot: Workflow,
    /// Execution reserved for the first tick, until that tick takes it.
    first_execution: Arc<Mutex<Option<Uuid>>>,
}

// ---------------------------------------------------------------------------
// Enqueuer
// ---------------------------------------------------------------------------

/// Shared by the manager and every cron callback.
#[derive(Clone)]
struct Enqueuer {
    queue: Arc<ExecutionQueue>,
    executions: Arc<dyn ExecutionStore>,
}

impl Enqueuer {
    async fn create_and_enqueue(&self, workflow: &Workflow) -> Result<Execution, EngineError> {
        let execution = self.executions.create_execution(workflow.id).await?;
        self.enqueue(workflow, execution.id).await?;
        Ok(execution)
    }

    /// Enqueue an immediate job for an existing pending execution. If the
    /// queue refuses it, the execution is finalized so it does not stay
    /// pending forever.
    async fn enqueue(&self, workflow: &Workflow, execution_id: Uuid) -> Result<(), EngineError> {
        let pushed = match serde_json::to_value(JobPayload::for_execution(workflow, execution_id)) {
            Ok(payload) => self
                .queue
                .enqueue(execution_id, payload, EnqueueOptions::immediate())
                .await
                .map(|_| ())
                .map_err(EngineError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &pushed {
            let message = format!("failed to enqueue: {e}");
            if let Err(update) = self
                .executions
                .update_execution(execution_id, ExecutionStatus::Failed, None, Some(message))
                .await
            {
                warn!("could not finalize execution {}: {}", execution_id, update);
            }
        }
        pushed
    }

    /// One cron tick. The first tick uses the reserved execution, later ones
    /// create their own.
    async fn tick(
        &self,
        workflow: &Workflow,
        first_execution: &Mutex<Option<Uuid>>,
    ) -> Result<Uuid, EngineError> {
        let reserved = first_execution.lock().await.take();
        let execution_id = match reserved {
            Some(id) => id,
            None => self.executions.create_execution(workflow.id).await?.id,
        };
        self.enqueue(workflow, execution_id).await?;
        Ok(execution_id)
    }
}

// ---------------------------------------------------------------------------
// TriggerManager
// ---------------------------------------------------------------------------

pub struct TriggerManager {
    enqueuer: Enqueuer,
    scheduler: JobScheduler,
    started: AtomicBool,
    registrations: Mutex<HashMap<Uuid, LiveRegistration>>,
}

impl TriggerManager {
    pub async fn new(
        queue: Arc<ExecutionQueue>,
        executions: Arc<dyn ExecutionStore>,
    ) -> Result<Self, EngineError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            enqueuer: Enqueuer { queue, executions },
            scheduler,
            started: AtomicBool::new(false),
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Start firing cron ticks. Registrations added before this are kept.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.start().await?;
        info!("cron scheduler started");
        Ok(())
    }

    /// Stop firing ticks. Registrations stay listed, but executions
    /// reserved for a first tick that will now never come are finalized as
    /// failed; the next start reserves fresh ones.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let stopped = if self.started.swap(false, Ordering::SeqCst) {
            let mut scheduler = self.scheduler.clone();
            let stopped = scheduler.shutdown().await;
            if stopped.is_ok() {
                info!("cron scheduler stopped");
            }
            stopped
        } else {
            Ok(())
        };

        for live in self.registrations.lock().await.values() {
            self.finalize_reserved(&live.first_execution, STOPPED_BEFORE_FIRST_RUN)
                .await;
        }

        Ok(stopped?)
    }

    /// Turn `trigger` into queue work for `workflow`.
    ///
    /// Re-scheduling a workflow that already has a cron registration
    /// replaces it.
    ///
    /// # Errors
    /// - [`EngineError::UnsupportedTrigger`]: nothing was created.
    /// - [`EngineError::InvalidCron`] / [`EngineError::InvalidAction`]: the
    ///   definition cannot run.
    /// - store, queue or scheduler failures.
    pub async fn schedule(
        &self,
        workflow: &Workflow,
        trigger: &Trigger,
    ) -> Result<Execution, EngineError> {
        validate_actions(&workflow.actions)?;

        match trigger {
            Trigger::Manual | Trigger::Webhook { .. } => {
                let execution = self.enqueuer.create_and_enqueue(workflow).await?;
                info!(
                    workflow_id = %workflow.id,
                    execution_id = %execution.id,
                    "{} trigger enqueued",
                    trigger.kind()
                );
                Ok(execution)
            }
            Trigger::Schedule { cron } => self.register(workflow, trigger, cron).await,
            Trigger::Unsupported => Err(EngineError::UnsupportedTrigger),
        }
    }

    async fn register(
        &self,
        workflow: &Workflow,
        trigger: &Trigger,
        cron: &str,
    ) -> Result<Execution, EngineError> {
        let scheduler_expr = validate_cron(cron)?;

        let mut snapshot = workflow.clone();
        snapshot.trigger = trigger.clone();

        let first_execution = Arc::new(Mutex::new(None));
        let job = self.cron_job(cron, &scheduler_expr, snapshot.clone(), Arc::clone(&first_execution))?;

        let mut registrations = self.registrations.lock().await;

        let scheduler = &self.scheduler;
        if let Some(old) = detach(&mut registrations, workflow.id, |key| async move {
            scheduler.remove(&key).await
        })
        .await?
        {
            info!(workflow_id = %workflow.id, "replaced schedule '{}'", old.info.cron_expr);
            self.finalize_reserved(&old.first_execution, CANCELLED_BEFORE_FIRST_RUN)
                .await;
        }

        let execution = self.enqueuer.executions.create_execution(workflow.id).await?;
        *first_execution.lock().await = Some(execution.id);

        let registration_key = match self.scheduler.add(job).await {
            Ok(key) => key,
            Err(e) => {
                self.finalize_reserved(&first_execution, "failed to register schedule").await;
                return Err(e.into());
            }
        };

        registrations.insert(
            workflow.id,
            LiveRegistration {
                info: ScheduledRegistration {
                    workflow_id: workflow.id,
                    cron_expr: cron.to_owned(),
                    registration_key,
                    registered_at: Utc::now(),
                },
                snapshot,
                first_execution,
            },
        );

        info!(workflow_id = %workflow.id, "scheduled with cron '{}'", cron);
        Ok(execution)
    }

    fn cron_job(
        &self,
        cron: &str,
        scheduler_expr: &str,
        workflow: Workflow,
        first_execution: Arc<Mutex<Option<Uuid>>>,
    ) -> Result<CronJob, EngineError> {
        let enqueuer = self.enqueuer.clone();
        let workflow = Arc::new(workflow);

        CronJob::new_async(scheduler_expr, move |_uuid, _lock| {
            let enqueuer = enqueuer.clone();
            let workflow = Arc::clone(&workflow);
            let first_execution = Arc::clone(&first_execution);

            Box::pin(async move {
                match enqueuer.tick(&workflow, &first_execution).await {
                    Ok(execution_id) => info!(
                        workflow_id = %workflow.id,
                        execution_id = %execution_id,
                        "cron tick enqueued"
                    ),
                    Err(e) => error!(workflow_id = %workflow.id, "cron tick failed: {e}"),
                }
            })
        })
        .map_err(|e| EngineError::InvalidCron {
            expr: cron.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Remove the cron registration for `workflow_id`.
    ///
    /// Returns `false` when there was none. If the first tick never fired,
    /// its reserved execution is finalized as failed.
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<bool, EngineError> {
        let scheduler = &self.scheduler;
        let removed = detach(&mut *self.registrations.lock().await, workflow_id, |key| async move {
            scheduler.remove(&key).await
        })
        .await?;

        match removed {
            Some(live) => {
                self.finalize_reserved(&live.first_execution, CANCELLED_BEFORE_FIRST_RUN)
                    .await;
                info!(workflow_id = %workflow_id, "schedule cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finalize_reserved(&self, first_execution: &Mutex<Option<Uuid>>, reason: &str) {
        let Some(execution_id) = first_execution.lock().await.take() else {
            return;
        };
        match self
            .enqueuer
            .executions
            .update_execution(execution_id, ExecutionStatus::Failed, None, Some(reason.to_owned()))
            .await
        {
            Ok(()) | Err(EngineError::ExecutionFinalized(_)) => {}
            Err(e) => warn!("could not finalize execution {}: {}", execution_id, e),
        }
    }

    /// Bring the registration for `workflow` in line with its definition:
    /// active schedule workflows get exactly one registration for their
    /// current definition, everything else gets none.
    ///
    /// Returns the new first-tick execution when a registration was created
    /// or replaced.
    pub async fn sync(&self, workflow: &Workflow) -> Result<Option<Execution>, EngineError> {
        let wants_schedule = workflow.is_active && matches!(workflow.trigger, Trigger::Schedule { .. });

        if !wants_schedule {
            self.cancel(workflow.id).await?;
            return Ok(None);
        }

        let unchanged = self
            .registrations
            .lock()
            .await
            .get(&workflow.id)
            .is_some_and(|live| same_definition(&live.snapshot, workflow));
        if unchanged {
            return Ok(None);
        }

        self.schedule(workflow, &workflow.trigger).await.map(Some)
    }

    /// Register every active scheduled workflow, e.g. on start-up. A
    /// workflow that cannot be registered is logged and skipped.
    ///
    /// Returns the number of live registrations afterwards.
    pub async fn restore(&self, workflows: &[Workflow]) -> usize {
        for workflow in workflows {
            if let Err(e) = self.sync(workflow).await {
                error!(workflow_id = %workflow.id, "could not restore schedule: {e}");
            }
        }
        let count = self.registrations.lock().await.len();
        info!("{} schedule(s) registered", count);
        count
    }

    /// Live registrations, oldest first.
    pub async fn registrations(&self) -> Vec<ScheduledRegistration> {
        let mut out: Vec<ScheduledRegistration> = self
            .registrations
            .lock()
            .await
            .values()
            .map(|live| live.info.clone())
            .collect();
        out.sort_by_key(|r| r.registered_at);
        out
    }

    pub async fn registration(&self, workflow_id: Uuid) -> Option<ScheduledRegistration> {
        self.registrations
            .lock()
            .await
            .get(&workflow_id)
            .map(|live| live.info.clone())
    }
}

/// Take the registration for `workflow_id` out of `registrations` once the
/// scheduler has dropped its job. If the scheduler refuses, the registration
/// stays tracked.
async fn detach<F, Fut>(
    registrations: &mut HashMap<Uuid, LiveRegistration>,
    workflow_id: Uuid,
    remove: F,
) -> Result<Option<LiveRegistration>, EngineError>
where
    F: FnOnce(Uuid) -> Fut,
    Fut: Future<Output = Result<(), JobSchedulerError>>,
{
    let Some(live) = registrations.remove(&workflow_id) else {
        return Ok(None);
    };
    if let Err(e) = remove(live.info.registration_key).await {
        registrations.insert(workflow_id, live);
        return Err(e.into());
    }
    Ok(Some(live))
}

fn same_definition(a: &Workflow, b: &Workflow) -> bool {
    a.user_id == b.user_id && a.trigger == b.trigger && a.actions == b.actions
}

// ---------------------------------------------------------------------------
// Webhook conditions
// ---------------------------------------------------------------------------

/// True when every condition key (a dotted path into `event`) is present
/// and equal to the expected value. Values compare as JSON, falling back to
/// their string forms so `"5"` matches `5`.
pub fn conditions_match(conditions: &Map<String, Value>, event: &Value) -> bool {
    conditions.iter().all(|(path, expected)| {
        field(event, path).is_some_and(|actual| {
            actual == expected || string_form(actual) == string_form(expected)
        })
    })
}

fn field<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(event, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    })
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::store::InMemoryStore;
    use queue::{MemoryBackend, QueueBackend, QueueConfig};
    use serde_json::json;

    struct Fixture {
        manager: TriggerManager,
        backend: Arc<MemoryBackend>,
        store: Arc<InMemoryStore>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(ExecutionQueue::new(
            backend.clone() as Arc<dyn QueueBackend>,
            QueueConfig::default(),
        ));
        let store = Arc::new(InMemoryStore::new());
        let manager = TriggerManager::new(queue, store.clone()).await.unwrap();
        Fixture { manager, backend, store }
    }

    fn workflow(trigger: Trigger) -> Workflow {
        Workflow::new(
            "wf",
            Uuid::new_v4(),
            trigger,
            vec![Action::new("log", json!({ "message": "hi" }))],
        )
    }

    fn daily() -> Trigger {
        Trigger::Schedule { cron: "0 9 * * *".into() }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_trigger_enqueues_one_immediate_job() {
        let f = fixture().await;
        let wf = workflow(Trigger::Manual);

        let before = Utc::now();
        let execution = f.manager.schedule(&wf, &Trigger::Manual).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(execution.workflow_id, wf.id);

        let jobs = f.backend.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, execution.id);
        assert!(jobs[0].run_at <= Utc::now() && jobs[0].run_at >= before);

        let payload: JobPayload = serde_json::from_value(jobs[0].payload.clone()).unwrap();
        assert_eq!(payload, JobPayload::for_execution(&wf, execution.id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn webhook_trigger_enqueues_immediately() {
        let f = fixture().await;
        let trigger = Trigger::Webhook { conditions: Map::new() };
        let wf = workflow(trigger.clone());

        f.manager.schedule(&wf, &trigger).await.unwrap();
        assert_eq!(f.backend.pending_len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schedule_then_cancel_round_trip() {
        let f = fixture().await;
        let wf = workflow(daily());

        let execution = f.manager.schedule(&wf, &daily()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        // Nothing is enqueued until the first tick.
        assert_eq!(f.backend.pending_len().await, 0);

        let registration = f.manager.registration(wf.id).await.unwrap();
        assert_eq!(registration.cron_expr, "0 9 * * *");

        assert!(f.manager.cancel(wf.id).await.unwrap());
        assert!(!f.manager.cancel(wf.id).await.unwrap());
        assert!(f.manager.registrations().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_before_first_tick_finalizes_reserved_execution() {
        let f = fixture().await;
        let wf = workflow(daily());

        let execution = f.manager.schedule(&wf, &daily()).await.unwrap();
        f.manager.cancel(wf.id).await.unwrap();

        let stored = f.store.get_execution(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(CANCELLED_BEFORE_FIRST_RUN));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_and_unknown_trigger_are_reported() {
        let f = fixture().await;

        let bad = Trigger::Schedule { cron: "every day".into() };
        let out = f.manager.schedule(&workflow(bad.clone()), &bad).await;
        assert!(matches!(out, Err(EngineError::InvalidCron { .. })));

        let out = f
            .manager
            .schedule(&workflow(Trigger::Unsupported), &Trigger::Unsupported)
            .await;
        assert!(matches!(out, Err(EngineError::UnsupportedTrigger)));

        assert!(f.manager.registrations().await.is_empty());
        assert_eq!(f.backend.jobs().await.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rescheduling_replaces_the_registration() {
        let f = fixture().await;
        let mut wf = workflow(daily());

        let first = f.manager.schedule(&wf, &daily()).await.unwrap();
        let hourly = Trigger::Schedule { cron: "0 * * * *".into() };
        wf.trigger = hourly.clone();
        f.manager.schedule(&wf, &hourly).await.unwrap();

        let registrations = f.manager.registrations().await;
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].cron_expr, "0 * * * *");

        // The old registration's reserved execution does not stay pending.
        let old = f.store.get_execution(first.id).await.unwrap();
        assert_eq!(old.status, ExecutionStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_follows_activation_and_definition_changes() {
        let f = fixture().await;
        let mut wf = workflow(daily());

        assert!(f.manager.sync(&wf).await.unwrap().is_some());
        // Same definition: left alone.
        assert!(f.manager.sync(&wf).await.unwrap().is_none());
        let key = f.manager.registration(wf.id).await.unwrap().registration_key;

        wf.actions.push(Action::new("log", json!({})));
        assert!(f.manager.sync(&wf).await.unwrap().is_some());
        assert_ne!(f.manager.registration(wf.id).await.unwrap().registration_key, key);

        wf.is_active = false;
        assert!(f.manager.sync(&wf).await.unwrap().is_none());
        assert!(f.manager.registration(wf.id).await.is_none());

        wf.is_active = true;
        wf.trigger = Trigger::Manual;
        assert!(f.manager.sync(&wf).await.unwrap().is_none());
        assert!(f.manager.registrations().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_skips_what_cannot_be_registered() {
        let f = fixture().await;
        let good = workflow(daily());
        let bad = workflow(Trigger::Schedule { cron: "61 * * * *".into() });
        let manual = workflow(Trigger::Manual);

        let count = f.manager.restore(&[good.clone(), bad, manual]).await;

        assert_eq!(count, 1);
        assert!(f.manager.registration(good.id).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_tick_uses_reserved_execution_then_fresh_ones() {
        let f = fixture().await;
        let wf = workflow(daily());
        let reserved = f.store.create_execution(wf.id).await.unwrap();
        let slot = Mutex::new(Some(reserved.id));

        let first = f.manager.enqueuer.tick(&wf, &slot).await.unwrap();
        let second = f.manager.enqueuer.tick(&wf, &slot).await.unwrap();

        assert_eq!(first, reserved.id);
        assert_ne!(second, reserved.id);
        assert_eq!(f.store.executions_for(wf.id).await.len(), 2);

        let job_ids: Vec<Uuid> = f.backend.jobs().await.iter().map(|j| j.id).collect();
        assert_eq!(job_ids, vec![first, second]);
    }

    #[test]
    fn conditions_compare_dotted_fields() {
        let event = json!({ "event": "issue.created", "issue": { "priority": 5, "labels": ["bug"] } });

        let mut conditions = Map::new();
        assert!(conditions_match(&conditions, &event));

        conditions.insert("event".into(), json!("issue.created"));
        conditions.insert("issue.priority".into(), json!("5"));
        conditions.insert("issue.labels.0".into(), json!("bug"));
        assert!(conditions_match(&conditions, &event));

        conditions.insert("issue.assignee".into(), json!("me"));
        assert!(!conditions_match(&conditions, &event));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_does_not_leave_reserved_executions_pending() {
        let f = fixture().await;
        let wf = workflow(daily());

        f.manager.start().await.unwrap();
        f.manager.restore(std::slice::from_ref(&wf)).await;
        f.manager.shutdown().await.unwrap();

        let queue = Arc::new(ExecutionQueue::new(
            f.backend.clone() as Arc<dyn QueueBackend>,
            QueueConfig::default(),
        ));
        let restarted = TriggerManager::new(queue, f.store.clone()).await.unwrap();
        restarted.restore(std::slice::from_ref(&wf)).await;

        let statuses: Vec<ExecutionStatus> = f
            .store
            .executions_for(wf.id)
            .await
            .iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![ExecutionStatus::Failed, ExecutionStatus::Pending]);

        let stopped = &f.store.executions_for(wf.id).await[0];
        assert_eq!(stopped.error.as_deref(), Some(STOPPED_BEFORE_FIRST_RUN));
    }

    #[tokio::test]
    async fn failed_scheduler_removal_keeps_the_registration() {
        let wf = workflow(daily());
        let key = Uuid::new_v4();
        let mut registrations = HashMap::new();
        registrations.insert(
            wf.id,
            LiveRegistration {
                info: ScheduledRegistration {
                    workflow_id: wf.id,
                    cron_expr: "0 9 * * *".into(),
                    registration_key: key,
                    registered_at: Utc::now(),
                },
                snapshot: wf.clone(),
                first_execution: Arc::new(Mutex::new(None)),
            },
        );

        let out = detach(&mut registrations, wf.id, |_| async { Err(JobSchedulerError::CantRemove) }).await;
        assert!(matches!(out, Err(EngineError::Scheduler(_))));
        assert_eq!(registrations[&wf.id].info.registration_key, key);

        let out = detach(&mut registrations, wf.id, |_| async { Ok(()) }).await.unwrap();
        assert_eq!(out.map(|live| live.info.registration_key), Some(key));
        assert!(registrations.is_empty());
    }
}
