pub mod cli;
pub mod config;
pub mod driver;
pub mod sandbox;

// Re-export main types
pub use sandbox::{
    Budget, DefaultFactory, HostError, LoadOptions, PendingValue, Sandbox, SandboxError,
    ScriptValue, Supervisor, SupervisorFactory, ThreadState,
};
