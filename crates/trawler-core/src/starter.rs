//! Per-spider run lifecycle.
//!
//! [`SpiderStarter`] owns at most one [`RunHandle`] per spider. A run is a
//! tokio task driving [`Spider::run`]; it is stopped cooperatively through
//! its cancellation token and aborted if it does not finish within the grace
//! period. Every transition is reported through the [`AlertManager`].

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alert::{AlertLevel, AlertManager};
use crate::error::AppError;
use crate::spider::{CrawlSummary, Spider};
use crate::status::{SpiderStatus, SpiderStatusKind};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// How a finished run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success(CrawlSummary),
    /// The run failed; the underlying error is kept.
    Failed(Arc<AppError>),
    Cancelled,
}

impl RunOutcome {
    pub fn from_result(result: Result<CrawlSummary, AppError>) -> Self {
        match result {
            Ok(summary) => RunOutcome::Success(summary),
            Err(AppError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(Arc::new(e)),
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Observable state of one spider's run slot.
#[derive(Debug, Clone)]
pub enum RunState {
    NotRunning,
    Running {
        run_id: Uuid,
        started_at: DateTime<Utc>,
    },
    /// The task ended but its handle has not been cleared yet.
    Finished(RunOutcome),
}

/// Map a run state onto the public status enum.
///
/// A failed run reports `error`, never `cancelled`.
pub fn derive_status(state: &RunState) -> SpiderStatusKind {
    match state {
        RunState::NotRunning => SpiderStatusKind::NotRunning,
        RunState::Running { .. } => SpiderStatusKind::Running,
        RunState::Finished(RunOutcome::Success(_)) => SpiderStatusKind::Success,
        RunState::Finished(RunOutcome::Failed(_)) => SpiderStatusKind::Error,
        RunState::Finished(RunOutcome::Cancelled) => SpiderStatusKind::Cancelled,
    }
}

/// The starter's record of an executing run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    abort: AbortHandle,
    /// Set by the task when `run` returns. A closed channel without a value
    /// means the task panicked or was aborted.
    outcome: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn is_active(&self) -> bool {
        let finished = self.outcome.borrow().is_some();
        !finished && self.outcome.has_changed().is_ok()
    }

    fn state(&self) -> RunState {
        let outcome = self.outcome.borrow().clone();
        if let Some(outcome) = outcome {
            return RunState::Finished(outcome);
        }
        if self.outcome.has_changed().is_err() {
            return RunState::Finished(RunOutcome::Failed(Arc::new(AppError::Generic(
                "Spider task ended without reporting an outcome".into(),
            ))));
        }
        RunState::Running {
            run_id: self.run_id,
            started_at: self.started_at,
        }
    }
}

/// Ways to name a managed spider.
#[derive(Clone, Copy)]
pub enum SpiderRef<'a> {
    Name(&'a str),
    Instance(&'a Arc<dyn Spider>),
    Kind(TypeId),
}

impl SpiderRef<'static> {
    pub fn of<T: Spider>() -> Self {
        SpiderRef::Kind(TypeId::of::<T>())
    }
}

impl<'a> From<&'a str> for SpiderRef<'a> {
    fn from(name: &'a str) -> Self {
        SpiderRef::Name(name)
    }
}

impl<'a> From<&'a String> for SpiderRef<'a> {
    fn from(name: &'a String) -> Self {
        SpiderRef::Name(name)
    }
}

impl<'a> From<&'a Arc<dyn Spider>> for SpiderRef<'a> {
    fn from(spider: &'a Arc<dyn Spider>) -> Self {
        SpiderRef::Instance(spider)
    }
}

impl From<TypeId> for SpiderRef<'static> {
    fn from(kind: TypeId) -> Self {
        SpiderRef::Kind(kind)
    }
}

impl fmt::Display for SpiderRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpiderRef::Name(name) => f.write_str(name),
            SpiderRef::Instance(spider) => f.write_str(spider.name()),
            SpiderRef::Kind(kind) => write!(f, "{kind:?}"),
        }
    }
}

type Handles = Arc<Mutex<HashMap<String, RunHandle>>>;

fn lock_handles(handles: &Mutex<HashMap<String, RunHandle>>) -> MutexGuard<'_, HashMap<String, RunHandle>> {
    handles.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned run handle mutex");
        poisoned.into_inner()
    })
}

fn clear_handle(handles: &Mutex<HashMap<String, RunHandle>>, name: &str, run_id: Uuid) {
    let mut handles = lock_handles(handles);
    if handles.get(name).is_some_and(|h| h.run_id == run_id) {
        handles.remove(name);
    }
}

/// Owned by the spawned task. The handle is released only when the task's
/// future is gone, whether it returned, panicked or was aborted.
struct RunSlot {
    handles: Handles,
    name: String,
    run_id: Uuid,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        clear_handle(&self.handles, &self.name, self.run_id);
    }
}

/// Cancels and aborts the run when `start` returns or is dropped.
struct ActiveRun {
    cancel: CancellationToken,
    abort: AbortHandle,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.abort.abort();
    }
}

pub struct SpiderStarter {
    spiders: Vec<Arc<dyn Spider>>,
    handles: Handles,
    alerts: Option<Arc<AlertManager>>,
    grace: Duration,
}

impl SpiderStarter {
    pub fn new(spiders: Vec<Arc<dyn Spider>>) -> Self {
        Self {
            spiders,
            handles: Arc::default(),
            alerts: None,
            grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn spiders(&self) -> &[Arc<dyn Spider>] {
        &self.spiders
    }

    pub fn alerts(&self) -> Option<&Arc<AlertManager>> {
        self.alerts.as_ref()
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<String, RunHandle>> {
        lock_handles(&self.handles)
    }

    async fn alert(&self, message: String, level: AlertLevel) {
        if let Some(alerts) = &self.alerts {
            alerts.broadcast(&message, level).await;
        }
    }

    /// Find a managed spider.
    pub fn resolve<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<Arc<dyn Spider>, AppError> {
        let spider = spider.into();
        let found = match spider {
            SpiderRef::Name(name) => self.spiders.iter().find(|s| s.name() == name),
            SpiderRef::Instance(instance) => self
                .spiders
                .iter()
                .find(|s| Arc::ptr_eq(s, instance))
                .or_else(|| self.spiders.iter().find(|s| s.name() == instance.name())),
            SpiderRef::Kind(kind) => self.spiders.iter().find(|s| s.kind() == kind),
        };
        found
            .cloned()
            .ok_or_else(|| AppError::SpiderNotFound(spider.to_string()))
    }

    pub fn state<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<RunState, AppError> {
        let spider = self.resolve(spider)?;
        Ok(self.state_of(spider.name()))
    }

    fn state_of(&self, name: &str) -> RunState {
        self.lock_handles()
            .get(name)
            .map_or(RunState::NotRunning, RunHandle::state)
    }

    /// Current status, derived fresh from the run handle.
    pub fn status<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<SpiderStatus, AppError> {
        let spider = self.resolve(spider)?;
        Ok(self.status_of(&*spider))
    }

    pub(crate) fn status_of(&self, spider: &dyn Spider) -> SpiderStatus {
        let state = self.state_of(spider.name());
        let status = SpiderStatus::new(spider.name(), derive_status(&state));
        match &state {
            RunState::Running { .. } => status.with_message(spider.status()),
            RunState::Finished(RunOutcome::Failed(e)) => status.with_message(e.to_string()),
            _ => status,
        }
    }

    pub fn is_running<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<bool, AppError> {
        Ok(matches!(self.state(spider)?, RunState::Running { .. }))
    }

    pub fn is_any_running(&self) -> bool {
        self.lock_handles().values().any(RunHandle::is_active)
    }

    /// Run a spider to completion.
    ///
    /// Starting a spider that is already running is a no-op reported as a
    /// `not_running` status with a conflict message. Dropping the returned
    /// future cancels and aborts the run; the spider counts as running until
    /// its task has actually ended.
    pub async fn start<'a>(
        &self,
        spider: impl Into<SpiderRef<'a>>,
        start_page: Option<u32>,
    ) -> Result<SpiderStatus, AppError> {
        let spider = self.resolve(spider)?;
        let name = spider.name();

        let launched = {
            let mut handles = self.lock_handles();
            if handles.get(name).is_some_and(RunHandle::is_active) {
                None
            } else {
                let run_id = Uuid::new_v4();
                let cancel = CancellationToken::new();
                let (outcome_tx, outcome_rx) = watch::channel(None);

                let task_spider = Arc::clone(&spider);
                let task_cancel = cancel.clone();
                let slot = RunSlot {
                    handles: Arc::clone(&self.handles),
                    name: name.to_string(),
                    run_id,
                };
                let task = tokio::spawn(async move {
                    let _slot = slot;
                    let outcome =
                        RunOutcome::from_result(task_spider.run(start_page, &task_cancel).await);
                    outcome_tx.send_replace(Some(outcome.clone()));
                    outcome
                });

                handles.insert(
                    name.to_string(),
                    RunHandle {
                        run_id,
                        started_at: Utc::now(),
                        cancel: cancel.clone(),
                        abort: task.abort_handle(),
                        outcome: outcome_rx,
                    },
                );
                Some((run_id, cancel, task))
            }
        };

        let Some((run_id, cancel, task)) = launched else {
            tracing::info!(spider = %name, "Spider is already running");
            self.alert(format!("Spider {name} is already running"), AlertLevel::Info)
                .await;
            return Ok(SpiderStatus::new(name, SpiderStatusKind::NotRunning)
                .with_message("already running"));
        };

        tracing::info!(spider = %name, %run_id, ?start_page, "Spider started");
        let active = ActiveRun {
            cancel,
            abort: task.abort_handle(),
        };
        self.alert(format!("Spider {name} started"), AlertLevel::Info)
            .await;

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => {
                tracing::error!(spider = %name, error = %e, "Spider task panicked");
                RunOutcome::Failed(Arc::new(AppError::Generic(format!("Spider task panicked: {e}"))))
            }
        };
        drop(active);

        let kind = derive_status(&RunState::Finished(outcome.clone()));
        let status = match &outcome {
            RunOutcome::Success(summary) => {
                tracing::info!(spider = %name, ?summary, "Spider run succeeded");
                SpiderStatus::new(name, kind).with_message(format!("{} new items", summary.added))
            }
            RunOutcome::Cancelled => {
                self.alert(format!("Spider {name} stopped by user"), AlertLevel::Warning)
                    .await;
                SpiderStatus::new(name, kind)
            }
            RunOutcome::Failed(e) => {
                tracing::error!(spider = %name, error = %e, "Spider run failed");
                self.alert(format!("Spider {name} failed: {e}"), AlertLevel::Error)
                    .await;
                SpiderStatus::new(name, kind).with_message(e.to_string())
            }
        };

        self.alert(
            format!("Spider {name} finished, progress: {}", spider.status()),
            AlertLevel::Info,
        )
        .await;
        Ok(status)
    }

    /// Stop a spider's run, waiting up to the grace period before aborting.
    /// The handle is always cleared.
    pub async fn stop<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<SpiderStatus, AppError> {
        let spider = self.resolve(spider)?;
        let name = spider.name();

        let running = self
            .lock_handles()
            .get(name)
            .map(|h| (h.run_id, h.is_active(), h.cancel.clone(), h.outcome.clone()));

        let Some((run_id, active, cancel, mut outcome)) = running else {
            tracing::debug!(spider = %name, "Stop requested for an idle spider");
            self.alert(format!("Spider {name} is not running"), AlertLevel::Warning)
                .await;
            return Ok(SpiderStatus::new(name, SpiderStatusKind::NotRunning));
        };

        if active {
            cancel.cancel();
            let stopped = tokio::time::timeout(self.grace, outcome.wait_for(Option::is_some))
                .await
                .is_ok();
            if !stopped {
                tracing::warn!(
                    spider = %name,
                    grace_secs = self.grace.as_secs_f64(),
                    "Spider did not stop within the grace period, aborting unresponsive task"
                );
                if let Some(handle) = self.lock_handles().get(name).filter(|h| h.run_id == run_id) {
                    handle.abort.abort();
                }
                // The outcome sender is dropped with the task's future.
                let closed = async { while outcome.changed().await.is_ok() {} };
                let ended = tokio::time::timeout(self.grace, closed).await.is_ok();
                if !ended {
                    tracing::error!(spider = %name, "Aborted task is still alive, releasing its handle anyway");
                }
            }
            self.alert(format!("Spider {name} stopped"), AlertLevel::Warning)
                .await;
        } else {
            self.alert(format!("Spider {name} already stopped"), AlertLevel::Info)
                .await;
        }

        clear_handle(&self.handles, name, run_id);
        Ok(SpiderStatus::new(name, SpiderStatusKind::NotRunning))
    }
}

impl fmt::Debug for SpiderStarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiderStarter")
            .field("spiders", &self.spiders.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
