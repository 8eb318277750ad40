// SPDX-License-Identifier: GPL-3.0-only

//! Serial job orchestrator
//!
//! Every operation that mutates the engine runs as a named job on a single
//! worker task, one job at a time. Jobs may be delayed, gated on a minimum
//! [`CameraState`], removed by name, or trimmed so only the most recent ones
//! of a name survive.
//!
//! State transitions are jobs too: [`Orchestrator::schedule_state_change`]
//! moves the target state immediately and the current state once the
//! transition has run.

use super::state::CameraState;
use super::task::{CompletionSource, Task};
use crate::errors::{EngineError, EngineResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type JobFn = Box<dyn FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send>;

/// Receives errors of jobs scheduled with `dispatch_errors`
pub type ErrorHandler = Arc<dyn Fn(&str, EngineError) + Send + Sync>;

struct Job {
    id: u64,
    name: String,
    min_state: Option<CameraState>,
    start_at: Instant,
    dispatch_errors: bool,
    state_change: bool,
    /// Taken when the job starts running
    run: Option<JobFn>,
    source: CompletionSource,
}

impl Job {
    fn is_pending(&self) -> bool {
        self.run.is_some()
    }
}

struct Queue {
    jobs: VecDeque<Job>,
    current: CameraState,
    target: CameraState,
    state_change_count: u64,
    next_id: u64,
}

enum Next {
    Run {
        id: u64,
        name: String,
        dispatch_errors: bool,
        run: JobFn,
        source: CompletionSource,
    },
    Wait(Option<Instant>),
}

impl Queue {
    fn next(&mut self, now: Instant) -> Next {
        let current = self.current;
        let gate_open = |job: &Job| job.min_state.is_none_or(|s| current.is_at_least(s));

        let ready = self
            .jobs
            .iter()
            .position(|job| job.is_pending() && job.start_at <= now && gate_open(job));

        if let Some(index) = ready {
            let job = &mut self.jobs[index];
            if let Some(run) = job.run.take() {
                return Next::Run {
                    id: job.id,
                    name: job.name.clone(),
                    dispatch_errors: job.dispatch_errors,
                    run,
                    source: job.source.clone(),
                };
            }
        }

        let deadline = self
            .jobs
            .iter()
            .filter(|job| job.is_pending() && gate_open(job))
            .map(|job| job.start_at)
            .min();
        Next::Wait(deadline)
    }
}

struct Inner {
    queue: Mutex<Queue>,
    notify: Arc<Notify>,
    error_handler: Mutex<Option<ErrorHandler>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current_state(&self, state: CameraState) {
        let previous = {
            let mut queue = self.queue();
            std::mem::replace(&mut queue.current, state)
        };
        if previous != state {
            debug!(from = %previous, to = %state, "Camera state changed");
        }
        // Gated jobs are re-evaluated by the worker
        self.notify.notify_one();
    }

    fn finish_state_change(&self, ticket: u64) {
        let mut queue = self.queue();
        if queue.state_change_count == ticket {
            queue.target = queue.current;
        }
    }

    fn handle_error(&self, name: &str, error: EngineError) {
        let handler = self
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(name, error);
        }
    }

    /// Drop every job, running ones included
    fn clear(&self) {
        let removed: Vec<Job> = {
            let mut queue = self.queue();
            queue.target = queue.current;
            queue.jobs.drain(..).collect()
        };
        for job in removed {
            job.source.try_set(Err(EngineError::Cancelled));
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let notify = Arc::clone(&self.notify);
        let handle = self.runtime.spawn(run_worker(weak, notify));
        let previous = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.abort();
        }
    }
}

async fn run_worker(inner: Weak<Inner>, notify: Arc<Notify>) {
    debug!("Orchestrator worker started");
    loop {
        let next = match inner.upgrade() {
            Some(inner) => inner.queue().next(Instant::now()),
            None => break,
        };

        match next {
            Next::Run {
                id,
                name,
                dispatch_errors,
                run,
                source,
            } => {
                debug!(job = %name, "Running job");
                let result = run().await;
                let Some(inner) = inner.upgrade() else {
                    source.try_set(result);
                    break;
                };
                inner.queue().jobs.retain(|job| job.id != id);

                match result {
                    Ok(()) => {
                        debug!(job = %name, "Job finished");
                        source.try_set(Ok(()));
                    }
                    Err(EngineError::Cancelled) => {
                        debug!(job = %name, "Job aborted");
                        source.try_set(Err(EngineError::Cancelled));
                    }
                    Err(e) => {
                        warn!(job = %name, error = %e, "Job failed");
                        if dispatch_errors {
                            inner.handle_error(&name, e.clone());
                        }
                        source.try_set(Err(e));
                    }
                }
            }
            Next::Wait(Some(deadline)) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            Next::Wait(None) => notify.notified().await,
        }
    }
    debug!("Orchestrator worker exiting");
}

/// Serial, state-aware job queue
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator whose worker runs on `runtime`
    pub fn new(runtime: Handle) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                current: CameraState::Off,
                target: CameraState::Off,
                state_change_count: 0,
                next_id: 0,
            }),
            notify: Arc::new(Notify::new()),
            error_handler: Mutex::new(None),
            worker: Mutex::new(None),
            runtime,
        });
        inner.spawn_worker();
        Self { inner }
    }

    /// Install the handler for errors of jobs scheduled with `dispatch_errors`
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self
            .inner
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn current_state(&self) -> CameraState {
        self.inner.queue().current
    }

    pub fn target_state(&self) -> CameraState {
        self.inner.queue().target
    }

    /// Whether a state transition is queued or running
    pub fn has_pending_state_change(&self) -> bool {
        self.inner.queue().jobs.iter().any(|job| job.state_change)
    }

    fn enqueue(
        &self,
        name: String,
        min_state: Option<CameraState>,
        delay: Duration,
        dispatch_errors: bool,
        state_change: bool,
        run: JobFn,
    ) -> Task {
        let (source, task) = CompletionSource::new();
        {
            let mut queue = self.inner.queue();
            let id = queue.next_id;
            queue.next_id += 1;
            debug!(job = %name, ?min_state, delay_ms = delay.as_millis() as u64, "Scheduling job");
            queue.jobs.push_back(Job {
                id,
                name,
                min_state,
                start_at: Instant::now() + delay,
                dispatch_errors,
                state_change,
                run: Some(run),
                source,
            });
        }
        self.inner.notify.notify_one();
        task
    }

    /// Run `job` on the next free slot
    pub fn schedule<F, Fut>(&self, name: &str, dispatch_errors: bool, job: F) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        self.schedule_delayed(name, dispatch_errors, Duration::ZERO, job)
    }

    /// Run `job` once `delay` has elapsed
    pub fn schedule_delayed<F, Fut>(
        &self,
        name: &str,
        dispatch_errors: bool,
        delay: Duration,
        job: F,
    ) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        self.enqueue(
            name.to_string(),
            None,
            delay,
            dispatch_errors,
            false,
            Box::new(move || job().boxed()),
        )
    }

    /// Run `job` once the camera state is at least `min_state`
    pub fn schedule_stateful<F, Fut>(&self, name: &str, min_state: CameraState, job: F) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        self.schedule_stateful_delayed(name, min_state, Duration::ZERO, job)
    }

    pub fn schedule_stateful_delayed<F, Fut>(
        &self,
        name: &str,
        min_state: CameraState,
        delay: Duration,
        job: F,
    ) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        self.enqueue(
            name.to_string(),
            Some(min_state),
            delay,
            true,
            false,
            Box::new(move || job().boxed()),
        )
    }

    /// Schedule the transition `from -> to`
    ///
    /// The target state moves to `to` right away. When the job runs it is
    /// cancelled unless the current state is still `from`. The current state
    /// becomes `to` when `change` succeeds, and unconditionally for teardown
    /// transitions.
    pub fn schedule_state_change<F, Fut>(
        &self,
        from: CameraState,
        to: CameraState,
        dispatch_errors: bool,
        change: F,
    ) -> Task
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let teardown = to < from;
        let name = format!("{} {} {}", from, if teardown { "<<" } else { ">>" }, to);
        let ticket = {
            let mut queue = self.inner.queue();
            queue.state_change_count += 1;
            queue.target = to;
            queue.state_change_count
        };

        let weak = Arc::downgrade(&self.inner);
        let job_name = name.clone();
        let run: JobFn = Box::new(move || {
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Err(EngineError::Cancelled);
                };
                let current = inner.queue().current;
                if current != from {
                    warn!(job = %job_name, state = %current, "Skipping state change, unexpected state");
                    inner.finish_state_change(ticket);
                    return Err(EngineError::Cancelled);
                }

                let result = change().await;
                if result.is_ok() || teardown {
                    inner.set_current_state(to);
                }
                inner.finish_state_change(ticket);
                result
            }
            .boxed()
        });
        self.enqueue(name, None, Duration::ZERO, dispatch_errors, true, run)
    }

    /// Cancel every pending job named `name`
    pub fn remove(&self, name: &str) {
        self.trim(name, 0);
    }

    /// Keep at most `allowed` pending jobs named `name`, the most recent ones
    pub fn trim(&self, name: &str, allowed: usize) {
        let removed: Vec<Job> = {
            let mut queue = self.inner.queue();
            let matching = queue
                .jobs
                .iter()
                .filter(|job| job.is_pending() && job.name == name)
                .count();
            let mut excess = matching.saturating_sub(allowed);
            if excess == 0 {
                return;
            }
            let mut removed = Vec::with_capacity(excess);
            let mut kept = VecDeque::with_capacity(queue.jobs.len());
            for job in queue.jobs.drain(..) {
                if excess > 0 && job.is_pending() && job.name == name {
                    excess -= 1;
                    removed.push(job);
                } else {
                    kept.push_back(job);
                }
            }
            queue.jobs = kept;
            removed
        };
        debug!(job = %name, count = removed.len(), "Removed pending jobs");
        for job in removed {
            job.source.try_set(Err(EngineError::Cancelled));
        }
    }

    /// Cancel every pending job; a running job finishes on its own
    pub fn reset(&self) {
        let removed: Vec<Job> = {
            let mut queue = self.inner.queue();
            let (pending, running): (VecDeque<Job>, VecDeque<Job>) =
                queue.jobs.drain(..).partition(|job| job.is_pending());
            queue.jobs = running;
            if !queue.jobs.iter().any(|job| job.state_change) {
                queue.target = queue.current;
            }
            pending.into_iter().collect()
        };
        for job in removed {
            job.source.try_set(Err(EngineError::Cancelled));
        }
    }

    /// Abandon the worker, including a job stuck mid-flight, and start over
    ///
    /// Must not be called from inside a job.
    pub fn restart_worker(&self) {
        info!("Restarting orchestrator worker");
        if let Some(worker) = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.abort();
        }
        self.inner.clear();
        self.inner.spawn_worker();
    }

    /// Names of queued and running jobs, oldest first
    pub fn job_names(&self) -> Vec<String> {
        self.inner
            .queue()
            .jobs
            .iter()
            .map(|job| job.name.clone())
            .collect()
    }

    /// Number of pending jobs named `name`
    pub fn pending_count(&self, name: &str) -> usize {
        self.inner
            .queue()
            .jobs
            .iter()
            .filter(|job| job.is_pending() && job.name == name)
            .count()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.queue();
        f.debug_struct("Orchestrator")
            .field("current", &queue.current)
            .field("target", &queue.target)
            .field("jobs", &queue.jobs.len())
            .finish()
    }
}
