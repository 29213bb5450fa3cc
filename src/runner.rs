//! Background task runner - fetch sessions and clone jobs off the
//! interactive surface
//!
//! All network and subprocess work runs on tokio tasks spawned here; the
//! interactive caller only consumes events. Within one fetch session the
//! event channel delivers pages strictly in request order (a single task
//! walks the cursor). Across sessions there is no ordering: submitting a new
//! fetch cancels the prior Running session before the new one emits, so at
//! most one authoritative stream exists at a time.
//!
//! Failures never escape a task. Every terminal condition - completion,
//! cancellation, API error - becomes a terminal event plus a session/job
//! state the caller can join on.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clone::CloneOrchestrator;
use crate::error::{ApiError, CloneError, CloneFailureKind};
use crate::github::{OwnerProfile, PageCursor, RepoLister, RepoRecord};
use crate::ratelimit::{Budget, RateLimitStatus, RateLimiter};

/// Events delivered on a fetch session's ordered stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The owner login resolved to a profile; pages follow.
    OwnerResolved(OwnerProfile),
    /// One page of records, deduplicated against the session so far.
    PageDelivered(Vec<RepoRecord>),
    /// Fresh quota snapshot after a response.
    RateLimitUpdated(RateLimitStatus),
    /// Quota exhausted; the session stays Running and resumes at the epoch.
    RateLimitPause { resume_at: u64 },
    /// Cursor exhausted; `total` is the unique record count.
    Completed { total: usize },
    /// Terminal API failure, human-readable.
    Failed(String),
    /// The cooperative cancel flag was observed.
    Cancelled,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Completed { .. } | SessionEvent::Failed(_) | SessionEvent::Cancelled
        )
    }
}

/// Terminal state of a fetch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// One end-to-end paginated query for one account.
///
/// Owns the insertion-ordered, duplicate-free record collection keyed by
/// `full_name`. Records are immutable once inserted and stay valid even if
/// the session is later cancelled.
#[derive(Debug)]
pub struct FetchSession {
    owner_login: String,
    records: Vec<RepoRecord>,
    seen: HashSet<String>,
    state: SessionState,
}

impl FetchSession {
    pub fn new(owner_login: impl Into<String>) -> Self {
        Self {
            owner_login: owner_login.into(),
            records: Vec::new(),
            seen: HashSet::new(),
            state: SessionState::Running,
        }
    }

    pub fn owner_login(&self) -> &str {
        &self.owner_login
    }

    /// Insert a page, preserving API order and dropping records whose
    /// `full_name` was already delivered. Returns the newly added records.
    pub fn insert_page(&mut self, page: Vec<RepoRecord>) -> Vec<RepoRecord> {
        let mut fresh = Vec::with_capacity(page.len());
        for record in page {
            if self.seen.insert(record.full_name.clone()) {
                self.records.push(record.clone());
                fresh.push(record);
            } else {
                debug!("Dropping duplicate record: {}", record.full_name);
            }
        }
        fresh
    }

    pub fn records(&self) -> &[RepoRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

/// Consumer handle for a running fetch session.
pub struct FetchHandle {
    cancel: Arc<AtomicBool>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<SessionState>,
}

impl FetchHandle {
    /// Request cooperative cancellation. In-flight requests finish but no
    /// further events are delivered once the flag is observed.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Next event in request order; `None` once the task is done and the
    /// stream is drained.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait for the session task and return its terminal state.
    pub async fn join(self) -> SessionState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => SessionState::Failed(format!("session task aborted: {e}")),
        }
    }
}

/// State of a clone job as observed from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneJobState {
    Pending,
    Spawned,
    Succeeded,
    Failed(CloneFailureKind),
    /// Rejected before spawning: destination conflict.
    Rejected,
}

/// One clone request and where it should land.
#[derive(Debug, Clone)]
pub struct CloneJob {
    pub id: u64,
    pub repo_full_name: String,
    pub clone_url: String,
    pub destination: PathBuf,
}

/// Outcome of a finished clone job.
#[derive(Debug)]
pub struct CloneResult {
    pub job_id: u64,
    pub outcome: Result<(), CloneError>,
}

/// Consumer handle for a running clone job.
pub struct CloneHandle {
    pub job: CloneJob,
    state: Arc<Mutex<CloneJobState>>,
    task: JoinHandle<CloneResult>,
}

impl CloneHandle {
    pub fn state(&self) -> CloneJobState {
        self.state.lock().expect("clone state lock poisoned").clone()
    }

    pub async fn join(self) -> CloneResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => CloneResult {
                job_id: self.job.id,
                outcome: Err(CloneError::classified(
                    CloneFailureKind::Unknown,
                    format!("clone task aborted: {e}"),
                )),
            },
        }
    }
}

/// Submits fetch sessions and clone jobs onto background tasks.
pub struct TaskRunner {
    lister: Arc<dyn RepoLister>,
    orchestrator: CloneOrchestrator,
    limiter: RateLimiter,
    active_fetch: Option<Arc<AtomicBool>>,
    claimed_destinations: Arc<Mutex<HashSet<PathBuf>>>,
    next_job_id: u64,
}

impl TaskRunner {
    pub fn new(
        lister: Arc<dyn RepoLister>,
        orchestrator: CloneOrchestrator,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            lister,
            orchestrator,
            limiter,
            active_fetch: None,
            claimed_destinations: Arc::new(Mutex::new(HashSet::new())),
            next_job_id: 0,
        }
    }

    /// Start a fetch session for `owner_login`, cancelling any prior Running
    /// session first so at most one authoritative stream exists.
    pub fn submit_fetch(&mut self, owner_login: &str) -> FetchHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        if let Some(prior) = self.active_fetch.replace(cancel.clone()) {
            debug!("Cancelling prior fetch session");
            prior.store(true, Ordering::Relaxed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let lister = Arc::clone(&self.lister);
        let limiter = self.limiter.clone();
        let login = owner_login.to_string();
        let flag = cancel.clone();

        let task =
            tokio::spawn(
                async move { run_fetch_session(lister, limiter, login, flag, tx).await },
            );

        FetchHandle {
            cancel,
            events: rx,
            task,
        }
    }

    /// Start a clone job. Two jobs may never target the same destination
    /// concurrently; the second is rejected at submission without spawning.
    pub fn submit_clone(
        &mut self,
        repo_full_name: &str,
        clone_url: &str,
        destination: PathBuf,
    ) -> CloneHandle {
        self.next_job_id += 1;
        let job = CloneJob {
            id: self.next_job_id,
            repo_full_name: repo_full_name.to_string(),
            clone_url: clone_url.to_string(),
            destination: destination.clone(),
        };

        let already_claimed = !self
            .claimed_destinations
            .lock()
            .expect("destination registry lock poisoned")
            .insert(destination.clone());

        if already_claimed {
            warn!(
                "Rejecting clone of {}: destination {} already targeted by a running job",
                repo_full_name,
                destination.display()
            );
            let state = Arc::new(Mutex::new(CloneJobState::Rejected));
            let job_id = job.id;
            let task = tokio::spawn(async move {
                CloneResult {
                    job_id,
                    outcome: Err(CloneError::ConflictingDestination(destination)),
                }
            });
            return CloneHandle { job, state, task };
        }

        let state = Arc::new(Mutex::new(CloneJobState::Pending));
        let task_state = Arc::clone(&state);
        let orchestrator = self.orchestrator.clone();
        let registry = Arc::clone(&self.claimed_destinations);
        let task_job = job.clone();

        let task = tokio::spawn(async move {
            *task_state.lock().expect("clone state lock poisoned") = CloneJobState::Spawned;
            info!("Clone job {} started: {}", task_job.id, task_job.repo_full_name);

            let outcome = orchestrator
                .clone_repo(&task_job.clone_url, &task_job.destination)
                .await;

            let terminal = match &outcome {
                Ok(()) => CloneJobState::Succeeded,
                Err(CloneError::ConflictingDestination(_)) => CloneJobState::Rejected,
                Err(CloneError::Classified { kind, .. }) => CloneJobState::Failed(*kind),
            };
            *task_state.lock().expect("clone state lock poisoned") = terminal;

            registry
                .lock()
                .expect("destination registry lock poisoned")
                .remove(&task_job.destination);

            CloneResult {
                job_id: task_job.id,
                outcome,
            }
        });

        CloneHandle { job, state, task }
    }

    /// Shared quota snapshot for status display.
    pub fn rate_limit(&self) -> Option<RateLimitStatus> {
        self.limiter.status()
    }
}

/// Drive one fetch session to a terminal state, emitting events in request
/// order. Never returns an error; every failure is folded into the state.
async fn run_fetch_session(
    lister: Arc<dyn RepoLister>,
    limiter: RateLimiter,
    login: String,
    cancel: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) -> SessionState {
    let mut session = FetchSession::new(login);

    // The consumer may drop the receiver early; sends are best-effort.
    let emit = |event: SessionEvent| {
        let _ = tx.send(event);
    };

    let login = session.owner_login().to_string();
    let owner = match gated_call(&limiter, &cancel, &tx, || lister.lookup_owner(&login)).await {
        GateOutcome::Ok(owner) => owner,
        GateOutcome::Cancelled => {
            emit(SessionEvent::Cancelled);
            session.state = SessionState::Cancelled;
            return session.state;
        }
        GateOutcome::Err(e) => {
            let reason = e.to_string();
            emit(SessionEvent::Failed(reason.clone()));
            session.state = SessionState::Failed(reason);
            return session.state;
        }
    };

    emit(SessionEvent::OwnerResolved(owner.clone()));
    if let Some(status) = limiter.status() {
        emit(SessionEvent::RateLimitUpdated(status));
    }

    let mut cursor = Some(PageCursor::first());

    while let Some(current) = cursor {
        let page = match gated_call(&limiter, &cancel, &tx, || lister.fetch_page(&owner, current))
            .await
        {
            GateOutcome::Ok(page) => page,
            GateOutcome::Cancelled => {
                emit(SessionEvent::Cancelled);
                session.state = SessionState::Cancelled;
                return session.state;
            }
            GateOutcome::Err(e) => {
                let reason = e.to_string();
                emit(SessionEvent::Failed(reason.clone()));
                session.state = SessionState::Failed(reason);
                return session.state;
            }
        };

        // The flag may have been set while the request was in flight; deliver
        // nothing after observing it.
        if cancel.load(Ordering::Relaxed) {
            emit(SessionEvent::Cancelled);
            session.state = SessionState::Cancelled;
            return session.state;
        }

        let fresh = session.insert_page(page.records);
        if !fresh.is_empty() {
            emit(SessionEvent::PageDelivered(fresh));
        }
        if let Some(status) = limiter.status() {
            emit(SessionEvent::RateLimitUpdated(status));
        }

        cursor = page.next_cursor;
    }

    info!(
        "Fetch session for '{}' completed with {} repositories",
        session.owner_login(),
        session.len()
    );
    emit(SessionEvent::Completed {
        total: session.len(),
    });
    session.state = SessionState::Completed;
    session.state
}

enum GateOutcome<T> {
    Ok(T),
    Cancelled,
    Err(ApiError),
}

/// Run one API operation behind the rate-limit gate.
///
/// Exhaustion pauses the session (emitting a visible resume ETA) and retries
/// the same operation after the window resets, so no page request is lost or
/// duplicated. A rate-limited response feeds the limiter and goes back around
/// the same loop.
async fn gated_call<T, F, Fut>(
    limiter: &RateLimiter,
    cancel: &AtomicBool,
    tx: &mpsc::UnboundedSender<SessionEvent>,
    mut op: F,
) -> GateOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    loop {
        if cancel.load(Ordering::Relaxed) {
            return GateOutcome::Cancelled;
        }

        if let Budget::WaitUntil(resume_at) = limiter.check_budget() {
            let _ = tx.send(SessionEvent::RateLimitPause { resume_at });
            let now = Utc::now().timestamp().max(0) as u64;
            let wait = Duration::from_secs(resume_at.saturating_sub(now).max(1));
            info!("Rate limit exhausted, pausing {}s", wait.as_secs());

            if cancellable_sleep(wait, cancel).await {
                return GateOutcome::Cancelled;
            }
            // Refill the window against the reset instant; the next
            // response's headers re-establish the true count.
            let _ = limiter.check_budget_at(resume_at);
        }

        match op().await {
            Ok(value) => return GateOutcome::Ok(value),
            Err(ApiError::RateLimited { reset_epoch }) => {
                limiter.exhaust(reset_epoch);
            }
            Err(e) => return GateOutcome::Err(e),
        }
    }
}

/// Sleep in one-second slices so a long rate-limit pause still observes the
/// cancel flag promptly. Returns true when cancelled.
async fn cancellable_sleep(total: Duration, cancel: &AtomicBool) -> bool {
    let slice = Duration::from_secs(1);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return true;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    cancel.load(Ordering::Relaxed)
}
