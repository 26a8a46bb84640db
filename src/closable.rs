//! Services the coordinator knows how to close.
//!
//! Anything with an async `close` can be registered by implementing
//! [`Closable`]. For the common cases there are adapters:
//!
//! - [`closable_fn`]: wrap an async closure.
//! - [`WithTimeout`]: bound a single service's close with its own deadline.
//! - [`BackgroundTasks`]: a group of tracked, cancellable tasks that closes by
//!   cancelling and then waiting for every task to finish.

use std::any::type_name;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Future returned by [`Closable::close`].
pub type CloseFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A resource with an asynchronous cleanup step.
///
/// `close` may fail, but it must eventually settle. The coordinator never
/// bounds an individual close; wrap the service in [`WithTimeout`] if it needs
/// one.
pub trait Closable: Send + Sync {
    fn close(&self) -> CloseFuture<'_>;

    /// Name used in log fields.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// [`Closable`] backed by an async closure. See [`closable_fn`].
pub struct FnClosable<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a named [`Closable`].
///
/// # Example
///
/// ```rust,ignore
/// let flush = closable_fn("flush-buffers", || async {
///     buffers.flush().await?;
///     Ok(())
/// });
/// coordinator.add_service(Arc::new(flush))?;
/// ```
pub fn closable_fn<F, Fut>(name: impl Into<String>, f: F) -> FnClosable<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnClosable {
        name: name.into(),
        f,
    }
}

impl<F, Fut> Closable for FnClosable<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn close(&self) -> CloseFuture<'_> {
        Box::pin((self.f)())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bounds a service's close with its own deadline.
///
/// When the deadline passes the inner close future is dropped and the overrun
/// becomes this service's error, which the coordinator logs and swallows like
/// any other failure.
pub struct WithTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C: Closable> WithTimeout<C> {
    /// Wrap `inner` so its close fails once `timeout` has elapsed.
    ///
    /// # Arguments
    ///
    /// * `inner` - Service whose close is bounded
    /// * `timeout` - Maximum time a single close may take
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<C: Closable> Closable for WithTimeout<C> {
    fn close(&self) -> CloseFuture<'_> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.inner.close()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "close of '{}' timed out after {}ms",
                    self.inner.name(),
                    self.timeout.as_millis()
                )),
            }
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// A named group of background tasks that can be closed as one service.
///
/// Tasks receive a child [`CancellationToken`] and are expected to return
/// once it is cancelled. Closing the group:
///
/// 1. Signals all tasks to stop via the cancellation token
/// 2. Closes the task tracker (prevents new tasks)
/// 3. Waits for all tasks to complete
///
/// # Example
///
/// ```rust,ignore
/// let workers = BackgroundTasks::new("workers");
/// workers.spawn(|cancel| async move {
///     loop {
///         tokio::select! {
///             biased;
///             _ = cancel.cancelled() => break,
///             _ = ticker.tick() => refresh().await,
///         }
///     }
/// });
/// coordinator.add_service(Arc::new(workers))?;
/// ```
#[derive(Clone)]
pub struct BackgroundTasks {
    name: String,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl BackgroundTasks {
    /// Create an empty task group.
    ///
    /// # Arguments
    ///
    /// * `name` - Name reported in log fields when the group is closed
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Spawn a task tracked by this group.
    ///
    /// The closure receives a token that is cancelled when the group closes.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancellation_token.child_token();
        self.tracker.spawn(task(cancel));
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether every task in the group has finished.
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}

impl Closable for BackgroundTasks {
    fn close(&self) -> CloseFuture<'_> {
        Box::pin(async move {
            debug!(group = %self.name, tasks = self.tracker.len(), "Stopping background tasks");

            self.cancellation_token.cancel();
            self.tracker.close();
            self.tracker.wait().await;

            debug!(group = %self.name, "All background tasks have completed");
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
