//! # Shutdown Manager
//!
//! Graceful shutdown coordination for Tokio applications:
//!
//! - **Single flight**: services are closed at most once, no matter how many
//!   signals or `shutdown()` calls race each other
//! - **Fault isolation**: a failing (or panicking) service is logged and the
//!   rest still get closed
//! - **Bounded waits**: an optional deadline limits how long the caller waits,
//!   without aborting cleanup that is still running
//! - **Late joiners**: any task can `wait()` for shutdown to be requested and
//!   finished without triggering it
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │   TriggerSource (OsSignals / ManualTrigger)    shutdown(..)   │
//! ├───────────────────────────────────────────────────────────────┤
//! │   ShutdownCoordinator  (begin_closure: Open → Closing, once)  │
//! ├───────────────────────────────────────────────────────────────┤
//! │   Closure pass  (sequential in order | parallel)              │
//! ├───────────────────────────────────────────────────────────────┤
//! │   Closable services  (closable_fn, WithTimeout, BackgroundTasks) │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shutdown_manager::{Closable, CoordinatorConfig, ShutdownCoordinator, closable_fn};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db: Arc<dyn Closable> = Arc::new(closable_fn("db", || async { Ok(()) }));
//!     let coordinator = ShutdownCoordinator::with_os_signals(
//!         CoordinatorConfig::default().parallel(true),
//!         vec![db],
//!     );
//!
//!     // Returns once SIGINT/SIGTERM has arrived and every service is closed.
//!     coordinator.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod closable;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod trigger;

// Re-exports for convenience
pub use closable::{BackgroundTasks, Closable, CloseFuture, WithTimeout, closable_fn};
pub use config::{Config, CoordinatorConfig, LogFormat, LoggerChoice};
pub use coordinator::ShutdownCoordinator;
pub use error::{ShutdownError, ShutdownResult};
pub use logger::{Field, Logger, NoopLogger, TracingLogger, init_tracing};
pub use trigger::{ManualTrigger, ManualTriggerHandle, OsSignals, Signal, TriggerSource};
