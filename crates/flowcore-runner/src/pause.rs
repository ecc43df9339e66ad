// crates/flowcore-runner/src/pause.rs
// ============================================================================
// Module: Flowcore Pause/Breakpoint State
// Description: Cooperative pause, resume, cancel, and breakpoint/step-over
//              state for one in-flight run.
// Purpose: Let a debugger-style client pause a run before a node, single
//          step through it, and resume or cancel it, per spec.md §4.7.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! The runner checks [`PauseState::should_pause_at`] immediately before
//! starting each node. A hit records a breakpoint/step pause and the runner
//! awaits [`PauseState::wait_for_resume_or_cancel`] before proceeding.
//! Cancellation is checked the same way and always takes priority: a
//! canceled run never resumes into further execution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use flowcore_model::core::identifiers::NodeId;
use tokio::sync::Notify;

// ============================================================================
// SECTION: Step Mode
// ============================================================================

/// Single-step request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// No step in flight.
    #[default]
    None,
    /// Pause before the next node regardless of breakpoints.
    StepOver,
}

// ============================================================================
// SECTION: Pause State
// ============================================================================

/// Cooperative pause/resume/cancel and breakpoint state for one run.
///
/// # Invariants
/// - `canceled` once set is never cleared; cancellation is terminal for the
///   run (spec.md §4.7 "cancel is terminal").
pub struct PauseState {
    breakpoints: Mutex<HashSet<NodeId>>,
    step_mode: Mutex<StepMode>,
    paused: AtomicBool,
    canceled: AtomicBool,
    notify: Notify,
}

impl Default for PauseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseState {
    /// Creates fresh, unpaused, uncanceled state with no breakpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakpoints: Mutex::new(HashSet::new()),
            step_mode: Mutex::new(StepMode::None),
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Replaces the breakpoint set wholesale.
    pub fn set_breakpoints(&self, breakpoints: impl IntoIterator<Item = NodeId>) {
        let mut guard = self.breakpoints.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = breakpoints.into_iter().collect();
    }

    /// Arms a single step-over: the run pauses before its very next node
    /// regardless of breakpoints, then the request is consumed.
    pub fn request_step_over(&self) {
        let mut mode = self.step_mode.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *mode = StepMode::StepOver;
    }

    /// Returns true and consumes a pending step-over if `node_id` is either
    /// the step target or a registered breakpoint.
    #[must_use]
    pub fn should_pause_at(&self, node_id: &NodeId) -> bool {
        let mut mode = self.step_mode.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *mode == StepMode::StepOver {
            *mode = StepMode::None;
            return true;
        }
        drop(mode);
        let breakpoints = self.breakpoints.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        breakpoints.contains(node_id)
    }

    /// Marks the run paused and wakes any waiter so it can observe the new
    /// state (used when a breakpoint fires, not to unpause).
    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Clears the paused flag and wakes anyone blocked in
    /// [`Self::wait_for_resume_or_cancel`].
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Marks the run canceled, terminally, and wakes any waiter.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Returns true once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Returns true while the run is paused and has not yet resumed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sets the paused flag and blocks until [`Self::resume`] or
    /// [`Self::cancel`] is called. Returns immediately if already canceled.
    pub async fn wait_for_resume_or_cancel(&self) {
        self.paused.store(true, Ordering::Release);
        loop {
            if self.is_canceled() || !self.is_paused() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn should_pause_at_matches_breakpoint() {
        let state = PauseState::new();
        let node = NodeId::new("n1");
        state.set_breakpoints([node.clone()]);
        assert!(state.should_pause_at(&node));
        assert!(state.should_pause_at(&NodeId::new("n1")));
        assert!(!state.should_pause_at(&NodeId::new("n2")));
    }

    #[test]
    fn step_over_is_consumed_after_one_hit() {
        let state = PauseState::new();
        state.request_step_over();
        assert!(state.should_pause_at(&NodeId::new("any")));
        assert!(!state.should_pause_at(&NodeId::new("any")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resume_unblocks_waiter() {
        let state = Arc::new(PauseState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.wait_for_resume_or_cancel().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(state.is_paused());
        state.resume();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("waiter finished").expect("no panic");
        assert!(!state.is_paused());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_unblocks_waiter_and_is_terminal() {
        let state = Arc::new(PauseState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.wait_for_resume_or_cancel().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.expect("waiter finished").expect("no panic");
        assert!(state.is_canceled());
    }
}
