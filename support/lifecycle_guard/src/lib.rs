// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tracks the lifecycle of a long-lived shared object and the callers
//! currently inside it.
//!
//! An object embeds an [`ObjectState`]. Every public method starts by taking
//! an [`AutoCaller`], which fails unless the object is ready and keeps the
//! object from being torn down until the method returns. Initialization runs
//! inside an [`InitSpan`], which must be explicitly marked as succeeded,
//! limited or failed. Teardown runs inside an [`UninitSpan`], which first
//! waits for every outstanding caller to leave.
//!
//! ```text
//! NotReady -> InInit -> Ready | Limited -> InUninit -> NotReady
//!                   \-> InitFailed -> InUninit -> NotReady
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use parking_lot::Condvar;
use parking_lot::Mutex;
use thiserror::Error;

/// The lifecycle state of an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not initialized yet, or fully torn down.
    NotReady,
    /// An [`InitSpan`] (or reinit span) is outstanding.
    InInit,
    /// Fully initialized.
    Ready,
    /// Initialized, but only some functionality is available.
    Limited,
    /// An [`UninitSpan`] is outstanding.
    InUninit,
    /// Initialization failed. The object must be uninitialized before it can
    /// be initialized again.
    InitFailed,
}

/// Returned when a caller, or a span, cannot be started in the current state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("object is not ready (state is {0:?})")]
pub struct NotReady(pub Lifecycle);

/// Lifecycle state plus outstanding-caller count for one object.
#[derive(Debug)]
pub struct ObjectState {
    inner: Mutex<Inner>,
    changed: Condvar,
}

#[derive(Debug)]
struct Inner {
    state: Lifecycle,
    callers: usize,
}

impl Default for ObjectState {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectState {
    /// Returns a new state tracker in [`Lifecycle::NotReady`].
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: Lifecycle::NotReady,
                callers: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> Lifecycle {
        self.inner.lock().state
    }

    /// Returns the number of outstanding callers.
    pub fn callers(&self) -> usize {
        self.inner.lock().callers
    }

    /// Registers a caller. Succeeds only if the object is
    /// [`Lifecycle::Ready`].
    ///
    /// Callers are reentrant: any number may be outstanding, on any thread.
    pub fn caller(&self) -> Result<AutoCaller<'_>, NotReady> {
        self.add_caller(false)
    }

    /// Registers a caller that can also work against a
    /// [`Lifecycle::Limited`] object.
    pub fn limited_caller(&self) -> Result<AutoCaller<'_>, NotReady> {
        self.add_caller(true)
    }

    fn add_caller(&self, allow_limited: bool) -> Result<AutoCaller<'_>, NotReady> {
        let mut inner = self.inner.lock();
        match inner.state {
            Lifecycle::Ready => {}
            Lifecycle::Limited if allow_limited => {}
            state => return Err(NotReady(state)),
        }
        inner.callers += 1;
        Ok(AutoCaller { state: self })
    }

    /// Starts initialization. The object must be [`Lifecycle::NotReady`].
    pub fn init_span(&self) -> Result<InitSpan<'_>, NotReady> {
        self.begin_init(Lifecycle::NotReady, Lifecycle::InitFailed)
    }

    /// Starts a second attempt at full initialization of a
    /// [`Lifecycle::Limited`] object. On failure the object stays limited.
    pub fn reinit_span(&self) -> Result<InitSpan<'_>, NotReady> {
        self.begin_init(Lifecycle::Limited, Lifecycle::Limited)
    }

    fn begin_init(
        &self,
        required: Lifecycle,
        on_failure: Lifecycle,
    ) -> Result<InitSpan<'_>, NotReady> {
        let mut inner = self.inner.lock();
        if inner.state != required {
            return Err(NotReady(inner.state));
        }
        inner.state = Lifecycle::InInit;
        Ok(InitSpan {
            state: self,
            outcome: InitOutcome::Pending,
            on_failure,
        })
    }

    /// Starts teardown.
    ///
    /// Returns `None` if the object is already uninitialized (or another
    /// thread tore it down while this one waited). Otherwise moves the object
    /// to [`Lifecycle::InUninit`], refuses new callers, and blocks until all
    /// outstanding callers are gone.
    ///
    /// Must not be called while the current thread holds an [`AutoCaller`]
    /// for the same object; that would wait forever.
    pub fn uninit_span(&self) -> Option<UninitSpan<'_>> {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                Lifecycle::NotReady => return None,
                Lifecycle::InInit | Lifecycle::InUninit => self.changed.wait(&mut inner),
                Lifecycle::Ready | Lifecycle::Limited | Lifecycle::InitFailed => break,
            }
        }
        inner.state = Lifecycle::InUninit;
        if inner.callers != 0 {
            tracing::debug!(callers = inner.callers, "waiting for callers to drain");
        }
        while inner.callers != 0 {
            self.changed.wait(&mut inner);
        }
        Some(UninitSpan { state: self })
    }

    fn set_state(&self, state: Lifecycle) {
        self.inner.lock().state = state;
        self.changed.notify_all();
    }
}

/// A registered caller of an object. The registration is dropped with the
/// guard.
#[must_use]
#[derive(Debug)]
pub struct AutoCaller<'a> {
    state: &'a ObjectState,
}

impl AutoCaller<'_> {
    /// Returns the object state observed by this caller.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.state()
    }
}

impl Drop for AutoCaller<'_> {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        inner.callers -= 1;
        if inner.callers == 0 {
            self.state.changed.notify_all();
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum InitOutcome {
    Pending,
    Succeeded,
    Limited,
    Failed,
}

/// Brackets initialization of an object.
///
/// The outcome must be set with [`InitSpan::set_succeeded`],
/// [`InitSpan::set_limited`] or [`InitSpan::set_failed`]. A span dropped
/// without an outcome counts as failed, so an early return through `?` leaves
/// the object in [`Lifecycle::InitFailed`], where only teardown is allowed.
#[must_use]
#[derive(Debug)]
pub struct InitSpan<'a> {
    state: &'a ObjectState,
    outcome: InitOutcome,
    on_failure: Lifecycle,
}

impl InitSpan<'_> {
    /// Marks initialization as complete.
    pub fn set_succeeded(&mut self) {
        self.outcome = InitOutcome::Succeeded;
    }

    /// Marks initialization as partially complete.
    pub fn set_limited(&mut self) {
        self.outcome = InitOutcome::Limited;
    }

    /// Marks initialization as failed.
    pub fn set_failed(&mut self) {
        self.outcome = InitOutcome::Failed;
    }

    /// Returns true if the span will leave the object unusable when dropped.
    pub fn failed(&self) -> bool {
        matches!(self.outcome, InitOutcome::Pending | InitOutcome::Failed)
    }
}

impl Drop for InitSpan<'_> {
    fn drop(&mut self) {
        let state = match self.outcome {
            InitOutcome::Succeeded => Lifecycle::Ready,
            InitOutcome::Limited => Lifecycle::Limited,
            InitOutcome::Pending | InitOutcome::Failed => {
                tracing::debug!(state = ?self.on_failure, "object initialization failed");
                self.on_failure
            }
        };
        self.state.set_state(state);
    }
}

/// Brackets teardown of an object. The object is [`Lifecycle::NotReady`]
/// once the span is dropped.
#[must_use]
#[derive(Debug)]
pub struct UninitSpan<'a> {
    state: &'a ObjectState,
}

impl Drop for UninitSpan<'_> {
    fn drop(&mut self) {
        self.state.set_state(Lifecycle::NotReady);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn ready() -> ObjectState {
        let state = ObjectState::new();
        state.init_span().unwrap().set_succeeded();
        state
    }

    #[test]
    fn callers_need_ready_object() {
        let state = ObjectState::new();
        assert_eq!(state.caller().unwrap_err(), NotReady(Lifecycle::NotReady));

        let mut span = state.init_span().unwrap();
        assert_eq!(state.caller().unwrap_err(), NotReady(Lifecycle::InInit));
        span.set_succeeded();
        drop(span);

        let a = state.caller().unwrap();
        let b = state.caller().unwrap();
        assert_eq!(state.callers(), 2);
        drop((a, b));
        assert_eq!(state.callers(), 0);
    }

    #[test]
    fn dropped_init_span_fails() {
        let state = ObjectState::new();
        {
            let span = state.init_span().unwrap();
            assert!(span.failed());
        }
        assert_eq!(state.state(), Lifecycle::InitFailed);
        assert!(state.caller().is_err());
        assert!(state.init_span().is_err());

        drop(state.uninit_span().unwrap());
        assert_eq!(state.state(), Lifecycle::NotReady);
        state.init_span().unwrap().set_succeeded();
        assert_eq!(state.state(), Lifecycle::Ready);
    }

    #[test]
    fn limited_objects() {
        let state = ObjectState::new();
        state.init_span().unwrap().set_limited();
        assert!(state.caller().is_err());
        drop(state.limited_caller().unwrap());

        // A failed reinit leaves the object limited.
        drop(state.reinit_span().unwrap());
        assert_eq!(state.state(), Lifecycle::Limited);

        state.reinit_span().unwrap().set_succeeded();
        drop(state.caller().unwrap());
    }

    #[test]
    fn uninit_twice() {
        let state = ready();
        assert!(state.uninit_span().is_some());
        assert!(state.uninit_span().is_none());
    }

    #[test]
    fn uninit_waits_for_callers() {
        let state = ready();
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            let caller = state.caller().unwrap();
            s.spawn(|| {
                let span = state.uninit_span();
                tx.send(()).unwrap();
                drop(span);
            });

            // The uninit thread must still be blocked on the caller.
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(caller);
            rx.recv().unwrap();
        });
        assert_eq!(state.state(), Lifecycle::NotReady);
    }
}
