//! Process supervision and log tailing for Bosun server instances.
//!
//! The orchestrator never talks to the managed server technology directly;
//! it drives the distribution's control launcher (`bin/server <verb> <name>`)
//! through [`ProcessSupervisor`], forwarding the child's output streams into
//! a shared [`LogSink`], and follows each server's primary log file with a
//! truncation-tolerant [`LogTailer`].

pub mod supervisor;
pub mod tailer;

pub use supervisor::{
    FanoutSink, LogSink, ProcessHandle, ProcessSupervisor, SpawnEnv, CALLBACK_URL_VAR,
    RUNTIME_HOME_VAR,
};
pub use tailer::LogTailer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to launch '{program}': {detail}")]
    Launch { program: String, detail: String },
    #[error("filesystem watch failed for {path}: {detail}")]
    Watch { path: String, detail: String },
}
