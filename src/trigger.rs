//! Trigger sources: where shutdown requests come from besides direct calls.
//!
//! The coordinator subscribes to one [`TriggerSource`] at construction and
//! stops listening as soon as closure begins. In production that source is
//! [`OsSignals`]; tests and embedders can use [`ManualTrigger`] to deliver
//! signals without touching process-wide state.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::error;

/// Termination signal kinds the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Interactive interrupt (SIGINT / Ctrl+C).
    Interrupt,
    /// Termination request (SIGTERM).
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Future returned by [`TriggerSource::recv`].
pub type TriggerFuture<'a> = Pin<Box<dyn Future<Output = Option<Signal>> + Send + 'a>>;

/// A stream of termination notifications.
///
/// `recv` resolves with the next delivered signal, or `None` once the source
/// can never deliver again. A source may deliver the same signal many times.
pub trait TriggerSource: Send + 'static {
    fn recv(&mut self) -> TriggerFuture<'_>;
}

/// Process termination signals: SIGINT and SIGTERM on Unix, Ctrl+C elsewhere.
///
/// Handlers are installed lazily on the first `recv`. If installation fails
/// the error is logged and the source reports itself exhausted, so the
/// coordinator still works through programmatic shutdown.
#[derive(Default)]
pub struct OsSignals {
    #[cfg(unix)]
    handlers: Option<UnixHandlers>,
    failed: bool,
}

#[cfg(unix)]
struct UnixHandlers {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl OsSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
impl OsSignals {
    async fn next_signal(&mut self) -> Option<Signal> {
        use tokio::signal::unix::{SignalKind, signal};

        if self.failed {
            return None;
        }

        if self.handlers.is_none() {
            let installed = signal(SignalKind::interrupt())
                .and_then(|interrupt| Ok((interrupt, signal(SignalKind::terminate())?)));
            match installed {
                Ok((interrupt, terminate)) => {
                    self.handlers = Some(UnixHandlers {
                        interrupt,
                        terminate,
                    });
                }
                Err(e) => {
                    error!("Failed to install signal handlers: {e}");
                    self.failed = true;
                    return None;
                }
            }
        }

        let handlers = self.handlers.as_mut()?;
        tokio::select! {
            received = handlers.interrupt.recv() => received.map(|()| Signal::Interrupt),
            received = handlers.terminate.recv() => received.map(|()| Signal::Terminate),
        }
    }
}

#[cfg(not(unix))]
impl OsSignals {
    async fn next_signal(&mut self) -> Option<Signal> {
        if self.failed {
            return None;
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(Signal::Interrupt),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                self.failed = true;
                None
            }
        }
    }
}

impl TriggerSource for OsSignals {
    fn recv(&mut self) -> TriggerFuture<'_> {
        Box::pin(self.next_signal())
    }
}

/// In-process trigger source driven by a [`ManualTriggerHandle`].
///
/// The source is exhausted once every handle has been dropped.
pub struct ManualTrigger {
    rx: mpsc::UnboundedReceiver<Signal>,
}

/// Sending half of a [`ManualTrigger`].
#[derive(Clone)]
pub struct ManualTriggerHandle {
    tx: mpsc::UnboundedSender<Signal>,
}

impl ManualTrigger {
    pub fn new() -> (Self, ManualTriggerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTriggerHandle { tx })
    }
}

impl ManualTriggerHandle {
    /// Deliver a signal.
    ///
    /// Returns `false` if nobody is listening any more (the coordinator has
    /// begun closing, or was dropped).
    pub fn fire(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

impl TriggerSource for ManualTrigger {
    fn recv(&mut self) -> TriggerFuture<'_> {
        Box::pin(self.rx.recv())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn test_manual_trigger_delivers_in_order() {
        let (mut source, handle) = ManualTrigger::new();

        assert!(handle.fire(Signal::Terminate));
        assert!(handle.fire(Signal::Interrupt));

        assert_eq!(source.recv().await, Some(Signal::Terminate));
        assert_eq!(source.recv().await, Some(Signal::Interrupt));
    }

    #[tokio::test]
    async fn test_manual_trigger_exhausted_when_handles_dropped() {
        let (mut source, handle) = ManualTrigger::new();
        let second = handle.clone();
        drop(handle);
        drop(second);

        assert_eq!(source.recv().await, None);
    }

    #[tokio::test]
    async fn test_fire_reports_closed_source() {
        let (source, handle) = ManualTrigger::new();
        drop(source);
        assert!(!handle.fire(Signal::Interrupt));
    }
}
