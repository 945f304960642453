//! Error types for the sandbox

/// Errors reported by the registry and supervisors
///
/// Guest runtime errors are not listed here: they are captured as
/// `ThreadState::Error` plus results, never returned from `run()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to compile script {name}: {message}")]
    Compile { name: String, message: String },

    #[error("Script {name} exceeded instruction limit ({instructions} instructions)")]
    BudgetExceeded { name: String, instructions: u64 },

    #[error("Script {name} is closed")]
    Closed { name: String },

    #[error("Script {name} is already running")]
    Busy { name: String },

    #[error("Invalid budget: quantum {quantum} must be non-zero and no larger than ceiling {ceiling}")]
    InvalidBudget { quantum: u32, ceiling: u64 },

    #[error("Lua error: {message}")]
    Runtime { message: String },
}

impl From<mlua::Error> for SandboxError {
    fn from(err: mlua::Error) -> Self {
        SandboxError::Runtime {
            message: describe_lua_error(&err),
        }
    }
}

/// Failure of a pending host operation
///
/// Surfaces inside the guest as a Lua runtime error raised by `await`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Render a Lua error without the callback traceback noise
pub fn describe_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe_lua_error(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
