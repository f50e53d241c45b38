//! Core orchestration for Bosun server lifecycles.
//!
//! This crate ties the provisioning and process layers together into the
//! [`Orchestrator`]: an explicit, constructor-injected object (no process
//! singleton) exposing fire-and-forget lifecycle operations. All mutating
//! work flows through a single-worker [`dispatcher::Dispatcher`], which is
//! the sole serialization point for the per-server state machines.

pub mod concurrency;
pub mod dispatcher;
pub mod executor;
pub mod lifecycle;
pub mod orchestrator;
pub mod server;
pub mod task;

pub use concurrency::{install_signal_handler, shutdown_requested, InstallLock};
pub use dispatcher::{Dispatcher, TaskRunner};
pub use lifecycle::{validate_transition, ServerState};
pub use orchestrator::Orchestrator;
pub use task::Task;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] bosun_schema::SchemaError),
    #[error("provision error: {0}")]
    Provision(#[from] bosun_provision::ProvisionError),
    #[error("process error: {0}")]
    Process(#[from] bosun_process::ProcessError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("control '{verb}' for server '{server}' failed: {status}")]
    ControlFailed {
        server: String,
        verb: String,
        status: String,
    },
    #[error("install tree is locked by another orchestrator: {0}")]
    LockHeld(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
