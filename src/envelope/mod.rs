//! The execution envelope: one blocking store call under the resource lock,
//! offloaded to the blocking pool and bounded by a timeout.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinError;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, LifecycleError, StoreError, StoreResult, TimeoutStage};
use crate::lock::{ResourceId, ResourceLock};

/// When the resource lock is given back after a call has timed out.
///
/// The blocking call itself cannot be cancelled; it keeps running after its
/// caller received the timeout failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRelease {
    /// Release as soon as the timeout fires. Queued callers proceed while the
    /// abandoned call may still be touching the resource.
    #[default]
    OnTimeout,
    /// Hold the lock until the abandoned call has actually finished.
    OnCompletion,
}

/// State of a gateway's store handle.
pub(crate) enum HandleSlot<S> {
    Unopened,
    Open(S),
    Closed,
}

pub(crate) type Handle<S> = Arc<Mutex<HandleSlot<S>>>;

pub(crate) fn new_handle<S>() -> Handle<S> {
    Arc::new(Mutex::new(HandleSlot::Unopened))
}

// A call that panicked while holding the slot already reported the panic to its
// caller; later calls keep using the handle.
pub(crate) fn lock_slot<S>(handle: &Handle<S>) -> MutexGuard<'_, HandleSlot<S>> {
    handle.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("store handle poisoned by a panicking call; recovering");
        poisoned.into_inner()
    })
}

/// Runs blocking calls against one resource.
pub struct Envelope {
    identity: ResourceId,
    lock: Arc<ResourceLock>,
    timeout: Duration,
    lock_timeout: Option<Duration>,
    release: LockRelease,
}

impl Envelope {
    pub fn new(identity: ResourceId, lock: Arc<ResourceLock>, config: &BridgeConfig) -> Self {
        Envelope {
            identity,
            lock,
            timeout: config.timeout,
            lock_timeout: config.lock_timeout,
            release: config.lock_release,
        }
    }

    pub fn identity(&self) -> &ResourceId {
        &self.identity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn lock_release(&self) -> LockRelease {
        self.release
    }

    pub(crate) fn lock(&self) -> &Arc<ResourceLock> {
        &self.lock
    }

    /// Run `call` against the open store in `handle`.
    ///
    /// Fails with a lifecycle error if the handle is not open when the call
    /// reaches the blocking pool.
    pub(crate) async fn run<S, T, F>(
        &self,
        operation: &'static str,
        handle: &Handle<S>,
        call: F,
    ) -> BridgeResult<T>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut S) -> StoreResult<T> + Send + 'static,
    {
        let handle = Arc::clone(handle);
        let identity = self.identity.to_string();
        self.execute(operation, move || {
            let mut slot = lock_slot(&handle);
            match &mut *slot {
                HandleSlot::Open(store) => call(store).map_err(BridgeError::from),
                HandleSlot::Unopened => Err(LifecycleError::NotOpen { identity }.into()),
                HandleSlot::Closed => Err(LifecycleError::Closed { identity }.into()),
            }
        })
        .await
    }

    /// Run `work` on the blocking pool while holding the resource lock.
    ///
    /// Every outcome comes back as a `BridgeResult`: the work's own result, a
    /// captured panic, or a timeout. The lock is released on every path.
    pub async fn execute<T, F>(&self, operation: &'static str, work: F) -> BridgeResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> BridgeResult<T> + Send + 'static,
    {
        let guard = self.acquire(operation).await?;
        tracing::debug!(identity = %self.identity, operation, "resource lock acquired");

        let started = Instant::now();
        let (task, held) = match self.release {
            LockRelease::OnTimeout => (tokio::task::spawn_blocking(work), Some(guard)),
            LockRelease::OnCompletion => (
                tokio::task::spawn_blocking(move || {
                    let _guard = guard;
                    work()
                }),
                None,
            ),
        };

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                let message = panic_message(err);
                tracing::warn!(identity = %self.identity, operation, %message, "store call panicked");
                Err(StoreError::Panicked(message).into())
            }
            Err(_) => {
                tracing::warn!(
                    identity = %self.identity,
                    operation,
                    timeout = ?self.timeout,
                    "store call timed out; abandoning it"
                );
                Err(BridgeError::Timeout {
                    operation,
                    stage: TimeoutStage::Execute,
                    after: self.timeout,
                })
            }
        };
        drop(held);

        tracing::debug!(
            identity = %self.identity,
            operation,
            elapsed = ?started.elapsed(),
            ok = outcome.is_ok(),
            "store call finished"
        );
        outcome
    }

    async fn acquire(&self, operation: &'static str) -> BridgeResult<OwnedMutexGuard<()>> {
        let lock = Arc::clone(&self.lock);
        let Some(limit) = self.lock_timeout else {
            return Ok(lock.lock_owned().await);
        };

        tokio::time::timeout(limit, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(identity = %self.identity, operation, "timed out waiting for resource lock");
                BridgeError::Timeout {
                    operation,
                    stage: TimeoutStage::Acquire,
                    after: limit,
                }
            })
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}
