//! # Sandbox - Supervised Lua Script Execution
//!
//! Runs untrusted Lua scripts inside coroutines of one embedded Lua state.
//!
//! ## Core Principles
//!
//! 1. **One supervisor per script**: each `Supervisor` exclusively owns a guest thread
//! 2. **Cooperative preemption**: a count hook yields the guest every quantum and
//!    aborts it once the instruction ceiling is reached
//! 3. **Errors are state**: guest errors and budget violations never propagate out of
//!    `run()`, they end up in `state()` and `results()`
//! 4. **Async bridge**: host functions may hand the guest a `PendingValue`; awaiting it
//!    suspends the host task, not the guest
//!
//! ## Layout
//!
//! - `registry`: `Sandbox`, the name -> supervisor table
//! - `supervisor`: the resume/yield/terminate loop
//! - `budget`: instruction metering and the count hook
//! - `bridge`: pending host values and the `await` prelude
//! - `environment`: per-script global tables
//! - `api`: sample host API exposed as `api`

pub mod api;
pub mod bridge;
pub mod budget;
pub mod environment;
pub mod errors;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod values;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use bridge::PendingValue;
pub use budget::Budget;
pub use errors::{HostError, SandboxError};
pub use registry::{DefaultFactory, LoadOptions, Sandbox, SupervisorFactory};
pub use state::ThreadState;
pub use supervisor::Supervisor;
pub use values::ScriptValue;
