use crate::CoreError;

/// Lifecycle state of one named server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unconfigured,
    Deployed,
    Configured,
    Running,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Unconfigured => write!(f, "unconfigured"),
            ServerState::Deployed => write!(f, "deployed"),
            ServerState::Configured => write!(f, "configured"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopped => write!(f, "stopped"),
        }
    }
}

pub fn validate_transition(from: ServerState, to: ServerState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            ServerState::Unconfigured | ServerState::Configured | ServerState::Stopped,
            ServerState::Deployed
        ) | (ServerState::Deployed, ServerState::Configured)
            | (
                ServerState::Configured | ServerState::Stopped,
                ServerState::Running
            )
            | (ServerState::Running, ServerState::Stopped)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
