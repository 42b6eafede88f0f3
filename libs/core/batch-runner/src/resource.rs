//! Per-worker resource handles.
//!
//! Every worker asks the [`ResourceFactory`] for its own handle (a database
//! session, a client, ...) before taking work and releases it exactly once
//! when it retires. Handles are never shared between workers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use batch_runner::{Resource, ResourceFactory};
//!
//! struct Session { conn: Connection }
//!
//! impl Resource for Session {
//!     fn close(&mut self) -> eyre::Result<()> {
//!         self.conn.close()?;
//!         Ok(())
//!     }
//! }
//!
//! let factory = move || -> eyre::Result<Session> { Ok(Session { conn: pool.get()? }) };
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// A handle a worker needs to run units of work.
pub trait Resource: Send + 'static {
    /// Release the handle.
    ///
    /// Called once per handle, possibly after a unit of work failed or
    /// panicked with it, so it must tolerate an unusable handle. Errors are
    /// logged and otherwise ignored.
    fn close(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

impl Resource for () {}

/// Creates one [`Resource`] per worker.
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Resource;

    /// Create a fresh handle. Called once for every worker that starts.
    fn create(&self) -> eyre::Result<Self::Resource>;
}

impl<F, R> ResourceFactory for F
where
    F: Fn() -> eyre::Result<R> + Send + Sync + 'static,
    R: Resource,
{
    type Resource = R;

    fn create(&self) -> eyre::Result<R> {
        self()
    }
}

/// Shared reference to a worker's handle, lent to its in-flight attempt.
pub type SharedResource<R> = Arc<Mutex<R>>;

/// Lock a worker's handle, recovering it if an earlier attempt panicked.
pub fn lock_resource<R>(resource: &Mutex<R>) -> MutexGuard<'_, R> {
    resource.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A worker-scoped handle released exactly once.
///
/// Call [`WorkerResource::release`] when the worker has no more work. If the
/// guard is dropped without that (for example while unwinding), the handle is
/// released on drop instead.
pub struct WorkerResource<R: Resource> {
    worker_id: usize,
    handle: Option<SharedResource<R>>,
}

impl<R: Resource> WorkerResource<R> {
    pub fn new(worker_id: usize, resource: R) -> Self {
        Self {
            worker_id,
            handle: Some(Arc::new(Mutex::new(resource))),
        }
    }

    /// Handle to pass to an attempt. `None` once released.
    pub fn handle(&self) -> Option<SharedResource<R>> {
        self.handle.clone()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Close the handle. Returns `false` if closing failed; the failure has
    /// already been logged and is not propagated.
    pub fn release(mut self) -> bool {
        self.close_once()
    }

    fn close_once(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let result = match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .close(),
            // An abandoned attempt still holds a reference; close through the lock.
            Err(shared) => lock_resource(&shared).close(),
        };

        match result {
            Ok(()) => {
                debug!(worker_id = self.worker_id, "Released worker resource");
                true
            }
            Err(e) => {
                warn!(
                    worker_id = self.worker_id,
                    error = %e,
                    "Failed to release worker resource, ignoring"
                );
                false
            }
        }
    }
}

impl<R: Resource> Drop for WorkerResource<R> {
    fn drop(&mut self) {
        self.close_once();
    }
}
