/*!
 * regbridge Engine
 *
 * The action queue, the dispatcher state machine that resolves queued
 * actions against the device registry, and the driver context tying them to
 * the host and the broker.
 */

#![warn(missing_docs)]

// Re-export core types
pub use regbridge_core::prelude;

pub mod action;
pub mod client;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod host;
pub mod probe;
pub mod queue;
pub mod worker;

// Re-export main types for convenience
pub use action::{Action, ActionKind, ActionRequest, ReadContext};
pub use client::ActionClient;
pub use dispatcher::{ActionDispatcher, DispatcherState, Step};
pub use driver::{Driver, DriverBuilder};
pub use error::{Error, Result};
pub use host::{route_report, ActionReport, CollectingHost, HostResults, LoggingHost};
pub use probe::{AlwaysDone, CompletionProbe, NeverDone, ScriptedProbe, SimulatedProbe};
pub use queue::{ActionReceiver, ActionSender, QueueNamespace};

/// regbridge engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("regbridge Engine {} initialized", VERSION);
    Ok(())
}
