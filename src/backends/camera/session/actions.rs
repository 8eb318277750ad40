// SPDX-License-Identifier: GPL-3.0-only

//! Capture actions
//!
//! An [`Action`] is a small state machine driven by capture results. It edits
//! the repeating request when it starts and watches the results until it
//! reaches a verdict. Bigger procedures are composed with [`sequence`],
//! [`together`] and [`timeout`].
//!
//! Actions registered in an [`ActionHolder`] receive every repeating result.
//! Their completion callbacks are returned to the caller rather than run in
//! place, so they can run once the session lock is released.

use super::device::{CaptureRequest, CaptureResult, SessionCharacteristics};
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of driving an action one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Running,
    Completed,
}

/// What an action sees while it runs
pub struct ActionContext<'a> {
    /// Repeating request; edits apply once [`ActionContext::apply`] is called
    pub request: &'a mut CaptureRequest,
    pub characteristics: &'a SessionCharacteristics,
    pub last_result: Option<&'a CaptureResult>,
    pub now: Instant,
    apply: bool,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        request: &'a mut CaptureRequest,
        characteristics: &'a SessionCharacteristics,
        last_result: Option<&'a CaptureResult>,
    ) -> Self {
        Self {
            request,
            characteristics,
            last_result,
            now: Instant::now(),
            apply: false,
        }
    }

    /// Ask for the repeating request to be submitted again
    pub fn apply(&mut self) {
        self.apply = true;
    }

    pub fn needs_apply(&self) -> bool {
        self.apply
    }
}

pub trait Action: Send {
    fn name(&self) -> &'static str;

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step;

    fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, _result: &CaptureResult) -> Step {
        Step::Running
    }

    /// Called instead of further steps when the action is cut short
    fn on_abort(&mut self, _ctx: &mut ActionContext<'_>) {}

    /// Verdict once completed; aborted actions report false
    fn is_successful(&self) -> bool {
        true
    }
}

/// Runs `actions` one after the other
pub fn sequence(actions: Vec<Box<dyn Action>>) -> Box<dyn Action> {
    Box::new(Sequence {
        actions,
        current: 0,
        aborted: false,
    })
}

/// Runs `actions` at once; completes when all of them are done
pub fn together(actions: Vec<Box<dyn Action>>) -> Box<dyn Action> {
    let done = vec![false; actions.len()];
    Box::new(Together {
        actions,
        done,
        aborted: false,
    })
}

/// Aborts `action` when it is still running after `duration`
///
/// The deadline is only checked when results arrive.
pub fn timeout(duration: Duration, action: Box<dyn Action>) -> Box<dyn Action> {
    Box::new(Timeout {
        duration,
        action,
        started: None,
        cut_short: false,
    })
}

struct Sequence {
    actions: Vec<Box<dyn Action>>,
    current: usize,
    aborted: bool,
}

impl Sequence {
    /// Start actions from `current` until one keeps running
    fn advance(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        while let Some(action) = self.actions.get_mut(self.current) {
            if action.on_start(ctx) == Step::Running {
                return Step::Running;
            }
            self.current += 1;
        }
        Step::Completed
    }
}

impl Action for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        self.advance(ctx)
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        let Some(action) = self.actions.get_mut(self.current) else {
            return Step::Completed;
        };
        if action.on_capture_completed(ctx, result) == Step::Running {
            return Step::Running;
        }
        self.current += 1;
        self.advance(ctx)
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        self.aborted = true;
        if let Some(action) = self.actions.get_mut(self.current) {
            action.on_abort(ctx);
        }
    }

    fn is_successful(&self) -> bool {
        !self.aborted && self.actions.iter().all(|a| a.is_successful())
    }
}

struct Together {
    actions: Vec<Box<dyn Action>>,
    done: Vec<bool>,
    aborted: bool,
}

impl Together {
    fn step(&self) -> Step {
        if self.done.iter().all(|d| *d) { Step::Completed } else { Step::Running }
    }
}

impl Action for Together {
    fn name(&self) -> &'static str {
        "together"
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        for (action, done) in self.actions.iter_mut().zip(self.done.iter_mut()) {
            *done = action.on_start(ctx) == Step::Completed;
        }
        self.step()
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        for (action, done) in self.actions.iter_mut().zip(self.done.iter_mut()) {
            if !*done {
                *done = action.on_capture_completed(ctx, result) == Step::Completed;
            }
        }
        self.step()
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        self.aborted = true;
        for (action, done) in self.actions.iter_mut().zip(self.done.iter_mut()) {
            if !*done {
                action.on_abort(ctx);
                *done = true;
            }
        }
    }

    fn is_successful(&self) -> bool {
        !self.aborted && self.actions.iter().all(|a| a.is_successful())
    }
}

struct Timeout {
    duration: Duration,
    action: Box<dyn Action>,
    started: Option<Instant>,
    cut_short: bool,
}

impl Action for Timeout {
    fn name(&self) -> &'static str {
        self.action.name()
    }

    fn on_start(&mut self, ctx: &mut ActionContext<'_>) -> Step {
        self.started = Some(ctx.now);
        self.action.on_start(ctx)
    }

    fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Step {
        if self.action.on_capture_completed(ctx, result) == Step::Completed {
            return Step::Completed;
        }
        let expired = self
            .started
            .is_some_and(|started| ctx.now.saturating_duration_since(started) > self.duration);
        if expired {
            debug!(action = self.action.name(), timeout_ms = self.duration.as_millis() as u64, "Action timed out");
            self.action.on_abort(ctx);
            self.cut_short = true;
            return Step::Completed;
        }
        Step::Running
    }

    fn on_abort(&mut self, ctx: &mut ActionContext<'_>) {
        self.cut_short = true;
        self.action.on_abort(ctx);
    }

    fn is_successful(&self) -> bool {
        !self.cut_short && self.action.is_successful()
    }
}

/// Identifies a registered action
pub type ActionId = u64;

pub type CompletionFn = Box<dyn FnOnce(bool) + Send>;

/// A finished action's callback with its verdict
pub struct Completion {
    callback: Option<CompletionFn>,
    success: bool,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn run(self) {
        if let Some(callback) = self.callback {
            callback(self.success);
        }
    }
}

struct Registered {
    id: ActionId,
    action: Box<dyn Action>,
    /// Waiting for a first result before starting
    pending_start: bool,
    on_complete: Option<CompletionFn>,
}

/// Actions that follow the repeating request
#[derive(Default)]
pub struct ActionHolder {
    next_id: ActionId,
    running: Vec<Registered>,
}

impl ActionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.running.iter().any(|r| r.id == id)
    }

    /// Register and start `action`
    ///
    /// Without a previous result the start is deferred to the next one. The
    /// completion is returned right away when the action finished on start.
    pub fn start(
        &mut self,
        mut action: Box<dyn Action>,
        ctx: &mut ActionContext<'_>,
        on_complete: Option<CompletionFn>,
    ) -> (ActionId, Option<Completion>) {
        let id = self.next_id;
        self.next_id += 1;
        if ctx.last_result.is_none() {
            debug!(action = action.name(), id, "No result yet, deferring action start");
            self.running.push(Registered {
                id,
                action,
                pending_start: true,
                on_complete,
            });
            return (id, None);
        }
        debug!(action = action.name(), id, "Starting action");
        if action.on_start(ctx) == Step::Completed {
            let success = action.is_successful();
            return (
                id,
                Some(Completion {
                    callback: on_complete,
                    success,
                }),
            );
        }
        self.running.push(Registered {
            id,
            action,
            pending_start: false,
            on_complete,
        });
        (id, None)
    }

    /// Drive every action with `result`
    pub fn on_capture_completed(&mut self, ctx: &mut ActionContext<'_>, result: &CaptureResult) -> Vec<Completion> {
        let mut completions = Vec::new();
        let mut index = 0;
        while index < self.running.len() {
            let entry = &mut self.running[index];
            let step = if entry.pending_start {
                entry.pending_start = false;
                entry.action.on_start(ctx)
            } else {
                entry.action.on_capture_completed(ctx, result)
            };
            if step == Step::Completed {
                let entry = self.running.remove(index);
                let success = entry.action.is_successful();
                debug!(action = entry.action.name(), id = entry.id, success, "Action completed");
                completions.push(Completion {
                    callback: entry.on_complete,
                    success,
                });
            } else {
                index += 1;
            }
        }
        completions
    }

    /// Abort `id` if it is still running
    pub fn abort(&mut self, id: ActionId, ctx: &mut ActionContext<'_>) -> Option<Completion> {
        let index = self.running.iter().position(|r| r.id == id)?;
        let mut entry = self.running.remove(index);
        Some(Self::abort_entry(&mut entry, ctx))
    }

    /// Abort everything, as when the session goes away
    pub fn abort_all(&mut self, ctx: &mut ActionContext<'_>) -> Vec<Completion> {
        self.running
            .drain(..)
            .collect::<Vec<_>>()
            .into_iter()
            .map(|mut entry| Self::abort_entry(&mut entry, ctx))
            .collect()
    }

    fn abort_entry(entry: &mut Registered, ctx: &mut ActionContext<'_>) -> Completion {
        debug!(action = entry.action.name(), id = entry.id, "Aborting action");
        if !entry.pending_start {
            entry.action.on_abort(ctx);
        }
        Completion {
            callback: entry.on_complete.take(),
            success: false,
        }
    }
}

impl std::fmt::Debug for ActionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.running.iter().map(|r| r.action.name()).collect();
        f.debug_struct("ActionHolder").field("running", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::session::device::Template;
    use crate::backends::camera::session::simulated::back_characteristics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Completes after `frames` results, with the given verdict
    struct CountDown {
        frames: usize,
        success: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl Action for CountDown {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn on_start(&mut self, _ctx: &mut ActionContext<'_>) -> Step {
            self.log.lock().unwrap().push(self.tag);
            if self.frames == 0 { Step::Completed } else { Step::Running }
        }

        fn on_capture_completed(&mut self, _ctx: &mut ActionContext<'_>, _result: &CaptureResult) -> Step {
            self.frames = self.frames.saturating_sub(1);
            if self.frames == 0 { Step::Completed } else { Step::Running }
        }

        fn is_successful(&self) -> bool {
            self.success
        }
    }

    fn count_down(frames: usize, log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Box<dyn Action> {
        Box::new(CountDown {
            frames,
            success: true,
            log: Arc::clone(log),
            tag,
        })
    }

    fn completion_counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, CompletionFn) {
        let done = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let (d, s) = (Arc::clone(&done), Arc::clone(&succeeded));
        let callback: CompletionFn = Box::new(move |success| {
            d.fetch_add(1, Ordering::SeqCst);
            if success {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });
        (done, succeeded, callback)
    }

    #[test]
    fn test_sequence_runs_in_order() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let result = CaptureResult::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut action = sequence(vec![
            count_down(1, &log, "first"),
            count_down(0, &log, "second"),
            count_down(2, &log, "third"),
        ]);

        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&result));
        assert_eq!(action.on_start(&mut ctx), Step::Running);
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Running);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Running);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Completed);
        assert!(action.is_successful());
    }

    #[test]
    fn test_together_waits_for_all() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let result = CaptureResult::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut action = together(vec![count_down(1, &log, "a"), count_down(3, &log, "b")]);

        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&result));
        assert_eq!(action.on_start(&mut ctx), Step::Running);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Running);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Running);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Completed);
    }

    #[test]
    fn test_timeout_fails_the_action() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let result = CaptureResult::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut action = timeout(Duration::from_millis(100), count_down(1000, &log, "slow"));

        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&result));
        assert_eq!(action.on_start(&mut ctx), Step::Running);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Running);
        ctx.now += Duration::from_millis(150);
        assert_eq!(action.on_capture_completed(&mut ctx, &result), Step::Completed);
        assert!(!action.is_successful());
    }

    #[test]
    fn test_holder_defers_start_until_first_result() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let result = CaptureResult::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut holder = ActionHolder::new();
        let (done, _, callback) = completion_counter();

        let mut ctx = ActionContext::new(&mut request, &characteristics, None);
        let (id, completion) = holder.start(count_down(0, &log, "deferred"), &mut ctx, Some(callback));
        assert!(completion.is_none());
        assert!(holder.contains(id));
        assert!(log.lock().unwrap().is_empty());

        let completions = holder.on_capture_completed(&mut ctx, &result);
        assert_eq!(completions.len(), 1);
        completions.into_iter().for_each(Completion::run);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(holder.is_empty());
    }

    #[test]
    fn test_abort_reports_failure() {
        let characteristics = back_characteristics();
        let mut request = CaptureRequest::new(Template::Preview);
        let result = CaptureResult::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut holder = ActionHolder::new();
        let (done, succeeded, callback) = completion_counter();

        let mut ctx = ActionContext::new(&mut request, &characteristics, Some(&result));
        let _ = holder.start(count_down(5, &log, "long"), &mut ctx, Some(callback));
        let _ = holder.start(count_down(5, &log, "other"), &mut ctx, None);
        let completions = holder.abort_all(&mut ctx);
        assert_eq!(completions.len(), 2);
        assert!(completions.iter().all(|c| !c.success()));
        completions.into_iter().for_each(Completion::run);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(succeeded.load(Ordering::SeqCst), 0);
        assert!(holder.is_empty());
    }
}
