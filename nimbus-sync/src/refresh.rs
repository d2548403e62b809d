//! Counting refreshes in flight

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::observable::Observable;

/// A refresh that has already been counted and only needs to be driven.
pub type Refresh = BoxFuture<'static, Result<(), SyncError>>;

/// A refresh running on its own task.
pub type RefreshHandle = JoinHandle<Result<(), SyncError>>;

/// Number of refreshes in flight, with a derived "is refreshing" flag.
///
/// This is a plain count. Overlapping refreshes each hold their own [`RefreshGuard`] and may
/// finish in any order.
#[derive(Clone, Debug)]
pub struct RefreshCounter {
    in_flight: Observable<usize>,
    refreshing: Observable<bool>,
}

impl RefreshCounter {
    /// A counter at zero.
    pub fn new() -> Self {
        let in_flight = Observable::new(0usize);
        let refreshing = in_flight.map(|count| *count > 0);
        Self {
            in_flight,
            refreshing,
        }
    }

    /// Counts one refresh until the returned guard is dropped.
    pub fn start(&self) -> RefreshGuard {
        self.in_flight.update(|count| *count += 1);
        RefreshGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Refreshes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// True while at least one refresh is in flight.
    pub fn refreshing(&self) -> Observable<bool> {
        self.refreshing.clone()
    }
}

impl Default for RefreshCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements its counter exactly once, when dropped.
#[must_use = "the refresh stops being counted when the guard is dropped"]
#[derive(Debug)]
pub struct RefreshGuard {
    in_flight: Observable<usize>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.in_flight
            .update(|count| *count = count.saturating_sub(1));
    }
}

/// Runs `refresh` on its own task, logging a failure before handing it back through the handle.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn_refresh(what: &'static str, refresh: Refresh) -> RefreshHandle {
    tokio::spawn(async move {
        let result = refresh.await;
        if let Err(e) = &result {
            tracing::warn!("{} refresh failed. {}", what, e);
        }
        result
    })
}
