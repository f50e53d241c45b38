use bosun_schema::ServerConfig;
use std::path::PathBuf;

/// One desired mutation, enqueued to the dispatcher.
///
/// Tasks are immutable values; execution order equals submission order.
/// The enum is closed, so there is no "unknown variant" path: adding a
/// variant forces every match site to handle it.
#[derive(Debug, Clone)]
pub enum Task {
    CreateServer {
        name: String,
        config: ServerConfig,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    DeployDropin {
        name: String,
        /// Target file name in the hot-deploy directory; source file name
        /// when absent.
        artifact: Option<String>,
        path: PathBuf,
        delete_after: bool,
    },
    UpdateConfig {
        name: String,
        config: ServerConfig,
    },
    Status,
}

impl Task {
    /// Server this task addresses, if it addresses one.
    pub fn server(&self) -> Option<&str> {
        match self {
            Task::CreateServer { name, .. }
            | Task::Start { name }
            | Task::Stop { name }
            | Task::DeployDropin { name, .. }
            | Task::UpdateConfig { name, .. } => Some(name),
            Task::Status => None,
        }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::CreateServer { .. } => "create",
            Task::Start { .. } => "start",
            Task::Stop { .. } => "stop",
            Task::DeployDropin { .. } => "deploy-dropin",
            Task::UpdateConfig { .. } => "update-config",
            Task::Status => "status",
        }
    }
}
