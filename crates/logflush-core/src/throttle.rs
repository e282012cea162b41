//! Leading-edge throttle for async actions.
//!
//! Within each window of `interval` the first call runs the action right away;
//! every later call in the same window collapses into a single trailing run at
//! the end of the window. Nothing is ever queued beyond that one trailing run.
//!
//! ```text
//! calls:    x  x x    x                x
//! runs:     L             T            L
//!           |<-- interval -->|
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What a [`Throttle::call`] did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleCall {
    /// Window was quiet; the action was spawned immediately
    Leading,
    /// A trailing run was scheduled for the end of the current window
    Scheduled,
    /// A trailing run was already pending; this call was absorbed into it
    Coalesced,
}

#[derive(Default)]
struct ThrottleState {
    last_run: Option<Instant>,
    trailing: Option<JoinHandle<()>>,
}

struct ThrottleInner {
    interval: Duration,
    action: Action,
    state: Mutex<ThrottleState>,
}

/// Rate limiter wrapping a zero-argument async action.
///
/// Cheap to clone; clones share the same window. Must be called from within a
/// tokio runtime.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<ThrottleInner>,
}

impl Throttle {
    pub fn new<F, Fut>(interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: Action = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(action()) });
        Self {
            inner: Arc::new(ThrottleInner {
                interval,
                action,
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Request a run of the action.
    pub fn call(&self) -> ThrottleCall {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let remaining = state
            .last_run
            .map(|last| self.inner.interval.saturating_sub(now.duration_since(last)))
            .unwrap_or(Duration::ZERO);

        if remaining.is_zero() {
            if let Some(handle) = state.trailing.take() {
                handle.abort();
            }
            state.last_run = Some(now);
            drop(state);

            trace!("throttle: leading run");
            tokio::spawn((self.inner.action)());
            return ThrottleCall::Leading;
        }

        if state.trailing.is_some() {
            return ThrottleCall::Coalesced;
        }

        let inner = self.inner.clone();
        state.trailing = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            {
                let mut state = inner.state.lock();
                state.last_run = Some(Instant::now());
                state.trailing = None;
            }
            trace!("throttle: trailing run");
            (inner.action)().await;
        }));

        ThrottleCall::Scheduled
    }

    /// Whether a trailing run is waiting for the window to close.
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().trailing.is_some()
    }

    /// Drop a pending trailing run, if any. Runs already started are unaffected.
    pub fn cancel(&self) {
        if let Some(handle) = self.inner.state.lock().trailing.take() {
            handle.abort();
        }
    }
}
