//! The shutdown coordinator.
//!
//! [`ShutdownCoordinator`] owns a registry of [`Closable`] services and closes
//! them exactly once, when either a [`TriggerSource`] delivers a signal or a
//! caller invokes [`shutdown`](ShutdownCoordinator::shutdown).
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──► Open ──(signal | shutdown())──► Closing ──(pass settles)──► Closed
//!              │                                 │
//!        add_service() ok              add_service() rejected
//! ```
//!
//! # Single Flight
//!
//! The `Open → Closing` transition happens under the registry lock. The first
//! trigger to take it snapshots the registry, fires the "initiated" latch,
//! stops the trigger listener and spawns the closure pass. Every later trigger
//! (another signal, a concurrent `shutdown()`) subscribes to the same cached
//! completion instead of running anything.
//!
//! # Timeouts
//!
//! A deadline given to `shutdown` only bounds the caller's wait. The closure
//! pass runs in its own task and keeps going after the caller gives up; a
//! hung service holds that task open, never the caller.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::closable::{Closable, closable_fn};
use crate::config::CoordinatorConfig;
use crate::error::{ShutdownError, ShutdownResult};
use crate::logger::{Field, Logger};
use crate::trigger::{OsSignals, Signal, TriggerSource};

/// Outcome of the closure pass, shared by every awaiter.
type PassOutcome = ShutdownResult<()>;

/// What caused closure to begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerOrigin {
    Signal(Signal),
    Programmatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
}

struct Registry {
    phase: Phase,
    services: Vec<Arc<dyn Closable>>,
    /// Every service ever accepted, including those already handed to the pass.
    registered: usize,
}

struct Inner {
    logger: Arc<dyn Logger>,
    parallel: bool,
    registry: Mutex<Registry>,
    /// Fired exactly once, when closure begins.
    initiated: CancellationToken,
    /// Stops the trigger listener task.
    listener: CancellationToken,
    /// `None` until the closure pass settles.
    completion: watch::Sender<Option<PassOutcome>>,
}

/// Coordinates closing registered services on shutdown.
///
/// Cloning is cheap and every clone refers to the same coordinator.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = ShutdownCoordinator::with_os_signals(
///     CoordinatorConfig::default(),
///     vec![Arc::new(db) as Arc<dyn Closable>],
/// );
/// coordinator.add_fn("flush-metrics", || async { Ok(()) })?;
///
/// // Blocks until SIGINT/SIGTERM arrives and every service has closed.
/// coordinator.wait().await?;
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator listening on `trigger`.
    ///
    /// Must be called from within a Tokio runtime: the trigger listener is
    /// spawned immediately.
    pub fn new<T: TriggerSource>(
        config: CoordinatorConfig,
        services: Vec<Arc<dyn Closable>>,
        trigger: T,
    ) -> Self {
        let logger = config.logger.into_logger();

        if services.is_empty() {
            logger.warn(
                "ShutdownManager instantiated without any services to close.",
                &[],
            );
        }

        let (completion, _) = watch::channel(None);
        let coordinator = Self {
            inner: Arc::new(Inner {
                logger,
                parallel: config.parallel,
                registry: Mutex::new(Registry {
                    phase: Phase::Open,
                    registered: services.len(),
                    services,
                }),
                initiated: CancellationToken::new(),
                listener: CancellationToken::new(),
                completion,
            }),
        };

        coordinator.spawn_trigger_listener(trigger);
        coordinator.inner.logger.debug("Waiting for OS signals...", &[]);

        coordinator
    }

    /// Create a coordinator listening for SIGINT and SIGTERM.
    pub fn with_os_signals(config: CoordinatorConfig, services: Vec<Arc<dyn Closable>>) -> Self {
        Self::new(config, services, OsSignals::new())
    }

    /// Register another service.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownError::AlreadyClosing` once closure has begun; the
    /// service is not added and will not be closed by this coordinator.
    pub fn add_service(&self, service: Arc<dyn Closable>) -> ShutdownResult<()> {
        let mut registry = self.inner.lock_registry();
        if registry.phase != Phase::Open {
            drop(registry);
            self.inner.logger.warn(
                "Service registered after shutdown began; ignoring",
                &[Field::new("service", service.name())],
            );
            return Err(ShutdownError::AlreadyClosing);
        }

        registry.services.push(service);
        registry.registered += 1;
        Ok(())
    }

    /// Register an async closure as a named service.
    ///
    /// # Errors
    ///
    /// Same as [`add_service`](Self::add_service).
    pub fn add_fn<F, Fut>(&self, name: impl Into<String>, f: F) -> ShutdownResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_service(Arc::new(closable_fn(name, f)))
    }

    /// Close every registered service and wait for the pass to settle.
    ///
    /// With `timeout`, the wait is bounded: on expiry the caller receives
    /// `ShutdownError::Timeout` while the closures keep running in the
    /// background. Calling this more than once, or racing it with a signal,
    /// never closes anything twice.
    ///
    /// # Errors
    ///
    /// `ShutdownError::Timeout` when the deadline elapses first, or
    /// `ShutdownError::PassFailed` if the closure pass itself broke.
    /// Individual service failures are logged, never returned.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> ShutdownResult<()> {
        self.inner
            .logger
            .info("Shutdown initiated programmatically", &[]);

        let completion = self.begin_closure(TriggerOrigin::Programmatic);

        let result = match timeout {
            None => await_completion(completion).await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, await_completion(completion)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ShutdownError::Timeout { timeout }),
                }
            }
        };

        if let Err(e) = &result {
            self.inner.logger.error(
                &format!("Shutdown failed: {e}"),
                &anyhow::Error::new(e.clone()),
                &[],
            );
        }

        result
    }

    /// [`shutdown`](Self::shutdown) with a deadline in milliseconds.
    pub async fn shutdown_with_timeout_ms(&self, timeout_ms: u64) -> ShutdownResult<()> {
        self.shutdown(Some(Duration::from_millis(timeout_ms))).await
    }

    /// Wait until shutdown has been requested and the closure pass has settled.
    ///
    /// Does not trigger shutdown itself.
    ///
    /// # Errors
    ///
    /// Returns the pass outcome; only a broken pass yields an error.
    pub async fn wait(&self) -> ShutdownResult<()> {
        self.requested().await;
        await_completion(self.inner.completion.subscribe()).await
    }

    /// Resolves once any trigger has requested shutdown.
    ///
    /// Unlike [`wait`](Self::wait) this does not wait for services to close.
    pub async fn requested(&self) {
        self.inner.initiated.cancelled().await;
    }

    /// Whether closure has begun.
    pub fn is_closed(&self) -> bool {
        self.inner.lock_registry().phase == Phase::Closing
    }

    /// Whether any trigger has requested shutdown.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.inner.initiated.is_cancelled()
    }

    /// Number of services registered with this coordinator.
    ///
    /// Keeps counting services after they have been handed to the closure
    /// pass; rejected late registrations are not included.
    pub fn service_count(&self) -> usize {
        self.inner.lock_registry().registered
    }

    /// Whether services are closed concurrently rather than in registration order.
    pub fn is_parallel(&self) -> bool {
        self.inner.parallel
    }

    /// Single entry point for every trigger. Idempotent.
    fn begin_closure(&self, origin: TriggerOrigin) -> watch::Receiver<Option<PassOutcome>> {
        let services = {
            let mut registry = self.inner.lock_registry();
            if registry.phase == Phase::Closing {
                return self.inner.completion.subscribe();
            }
            registry.phase = Phase::Closing;
            self.inner.initiated.cancel();
            std::mem::take(&mut registry.services)
        };

        match origin {
            TriggerOrigin::Signal(signal) => self.inner.logger.info(
                "Graceful shutdown initiated by signal",
                &[Field::new("signal", signal.to_string())],
            ),
            TriggerOrigin::Programmatic => self.inner.logger.info(
                "Graceful shutdown initiated programmatically",
                &[Field::new("services", services.len())],
            ),
        }

        self.inner.listener.cancel();

        let completion = self.inner.completion.subscribe();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let pass = tokio::spawn(close_services(
                inner.logger.clone(),
                services,
                inner.parallel,
            ));
            let outcome = pass.await.map_err(|e| pass_failure(&e));
            inner.completion.send_replace(Some(outcome));
        });

        completion
    }

    fn spawn_trigger_listener<T: TriggerSource>(&self, mut trigger: T) {
        let coordinator = self.clone();
        let cancel = self.inner.listener.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased; // Stop listening as soon as closure begins

                    _ = cancel.cancelled() => break,
                    received = trigger.recv() => match received {
                        Some(signal) => {
                            coordinator.begin_closure(TriggerOrigin::Signal(signal));
                        }
                        None => break,
                    },
                }
            }
        });
    }
}

impl Inner {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        // The registry is only touched in short, non-panicking sections.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("parallel", &self.inner.parallel)
            .field("closed", &self.is_closed())
            .field("services", &self.service_count())
            .finish()
    }
}

// =============================================================================
// Closure Pass
// =============================================================================

/// Close every service, logging and swallowing individual failures.
async fn close_services(
    logger: Arc<dyn Logger>,
    services: Vec<Arc<dyn Closable>>,
    parallel: bool,
) {
    if parallel {
        let handles: Vec<_> = services
            .into_iter()
            .map(|service| {
                let name = service.name().to_string();
                (name, tokio::spawn(close_one(logger.clone(), service)))
            })
            .collect();

        for (name, handle) in handles {
            settle(logger.as_ref(), &name, handle.await);
        }
    } else {
        for service in services {
            let name = service.name().to_string();
            let handle = tokio::spawn(close_one(logger.clone(), service));
            settle(logger.as_ref(), &name, handle.await);
        }
    }
}

/// Run one service's close in isolation.
async fn close_one(logger: Arc<dyn Logger>, service: Arc<dyn Closable>) -> anyhow::Result<()> {
    logger.debug("Closing service", &[Field::new("service", service.name())]);
    service.close().await
}

/// Log the settlement of one service. Errors stop here.
fn settle(logger: &dyn Logger, name: &str, joined: Result<anyhow::Result<()>, JoinError>) {
    let result = joined.unwrap_or_else(|e| Err(normalize_join_error(e)));
    match result {
        Ok(()) => logger.debug("Service closed", &[Field::new("service", name)]),
        Err(e) => logger.error(
            &format!("Error closing service: {e}"),
            &e,
            &[Field::new("service", name)],
        ),
    }
}

/// Turn a panicked or cancelled close task into an ordinary error.
fn normalize_join_error(e: JoinError) -> anyhow::Error {
    if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        anyhow!("service panicked: {message}")
    } else {
        anyhow!("service close task was cancelled")
    }
}

fn pass_failure(e: &JoinError) -> ShutdownError {
    ShutdownError::PassFailed(e.to_string())
}

/// Wait for the cached pass outcome.
async fn await_completion(mut completion: watch::Receiver<Option<PassOutcome>>) -> PassOutcome {
    let settled = completion
        .wait_for(Option::is_some)
        .await
        .map(|outcome| outcome.clone());

    match settled {
        Ok(outcome) => outcome.unwrap_or(Ok(())),
        Err(_) => Err(ShutdownError::PassFailed(
            "coordinator dropped before the pass settled".to_string(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::trigger::ManualTrigger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_service(name: &str, calls: Arc<AtomicUsize>) -> Arc<dyn Closable> {
        Arc::new(closable_fn(name.to_string(), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    fn silent() -> CoordinatorConfig {
        CoordinatorConfig::default().silent()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (trigger, _handle) = ManualTrigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator =
            ShutdownCoordinator::new(silent(), vec![counting_service("a", calls)], trigger);

        assert!(!coordinator.is_closed());
        assert!(!coordinator.is_shutdown_initiated());
        assert!(!coordinator.is_parallel());
        assert_eq!(coordinator.service_count(), 1);
    }

    #[tokio::test]
    async fn test_begin_closure_is_idempotent() {
        let (trigger, _handle) = ManualTrigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new(
            silent(),
            vec![counting_service("a", calls.clone())],
            trigger,
        );

        let first = coordinator.begin_closure(TriggerOrigin::Programmatic);
        let second = coordinator.begin_closure(TriggerOrigin::Signal(Signal::Interrupt));

        assert_eq!(await_completion(first).await, Ok(()));
        assert_eq!(await_completion(second).await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_closed());
        assert!(coordinator.is_shutdown_initiated());
        assert_eq!(coordinator.service_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_close_is_normalized() {
        let handle = tokio::spawn(async { panic!("close exploded") });
        let err = normalize_join_error(handle.await.unwrap_err());
        assert_eq!(err.to_string(), "service panicked: close exploded");
    }

    #[tokio::test]
    async fn test_add_service_rejected_after_closure() {
        let (trigger, _handle) = ManualTrigger::new();
        let coordinator = ShutdownCoordinator::new(silent(), Vec::new(), trigger);

        coordinator.shutdown(None).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let result = coordinator.add_service(counting_service("late", calls.clone()));
        assert_eq!(result, Err(ShutdownError::AlreadyClosing));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_debug_output() {
        let (trigger, _handle) = ManualTrigger::new();
        let coordinator =
            ShutdownCoordinator::new(silent().parallel(true), Vec::new(), trigger);

        let debug = format!("{coordinator:?}");
        assert!(debug.contains("parallel: true"));
        assert!(debug.contains("closed: false"));
    }

    #[tokio::test]
    async fn test_service_count_survives_closure() {
        let (trigger, _handle) = ManualTrigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new(
            silent(),
            vec![counting_service("a", calls.clone())],
            trigger,
        );
        coordinator
            .add_service(counting_service("b", calls.clone()))
            .unwrap();

        coordinator.shutdown(None).await.unwrap();
        let _ = coordinator.add_service(counting_service("late", calls.clone()));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.service_count(), 2);
        let debug = format!("{coordinator:?}");
        assert!(debug.contains("closed: true"));
        assert!(debug.contains("services: 2"));
    }
}
