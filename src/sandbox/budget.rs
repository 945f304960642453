//! Instruction budget enforcement
//!
//! A count hook fires every `quantum` guest instructions. Each firing either yields
//! the guest back to the host or, once the ceiling is reached, aborts it. The hook
//! never touches the guest beyond that: it only updates the shared `Meter`.
//!
//! The Lua state holds a single hook at a time, so supervisors take turns: whoever
//! is about to resume its guest re-installs its hook if another guest holds it.

use std::cell::Cell;
use std::rc::Rc;

use mlua::{HookTriggers, Thread, VmState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::SandboxError;
use super::state::ThreadState;

pub const DEFAULT_QUANTUM: u32 = 1000;
pub const DEFAULT_CEILING: u64 = 4000;

/// Instruction budget for one script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Guest instructions between hook firings
    pub quantum: u32,
    /// Cumulative instruction count at which the guest is terminated
    pub ceiling: u64,
}

impl Budget {
    pub fn new(quantum: u32, ceiling: u64) -> Self {
        Self { quantum, ceiling }
    }

    /// Number of hook firings a script gets before it is terminated
    pub fn max_firings(&self) -> u64 {
        let quantum = u64::from(self.quantum.max(1));
        self.ceiling.div_ceil(quantum).max(1)
    }

    /// A zero quantum never fires the hook, so it could never terminate anything
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.quantum == 0 || self.ceiling < u64::from(self.quantum) {
            return Err(SandboxError::InvalidBudget {
                quantum: self.quantum,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            ceiling: DEFAULT_CEILING,
        }
    }
}

/// What the hook should do after a firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Under budget: yield control back to the host
    Yield,
    /// Ceiling reached: raise inside the guest
    Terminate,
    /// Already terminated but the guest swallowed the error: yield to the host
    Unwind,
    /// The previous unwind could not yield (non-yieldable context): raise again
    Reraise,
}

/// Shared counters between a supervisor and its hook
///
/// The state lives here rather than on the supervisor because the hook has to
/// write it from inside `resume()`.
#[derive(Debug)]
pub struct Meter {
    budget: Budget,
    instructions: Cell<u64>,
    state: Cell<ThreadState>,
    unwinding: Cell<bool>,
}

impl Meter {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            instructions: Cell::new(0),
            state: Cell::new(ThreadState::Idle),
            unwinding: Cell::new(false),
        }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn instructions(&self) -> u64 {
        self.instructions.get()
    }

    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.set(state);
    }

    /// Called by the guest right before a voluntary yield
    ///
    /// A hook yield that Lua skipped (inside a C call boundary) leaves `ForceYield`
    /// behind; it must not be mistaken for the voluntary yield that follows.
    pub fn clear_forced_yield(&self) {
        if self.state.get() == ThreadState::ForceYield {
            self.state.set(ThreadState::Running);
        }
    }

    /// Fails once the guest has been terminated
    pub fn check_terminated(&self, name: &str) -> mlua::Result<()> {
        if self.state.get() == ThreadState::ForceTerminate {
            return Err(budget_exceeded(name, self));
        }
        Ok(())
    }

    /// Account for one quantum and decide what the guest should do next
    pub fn tick(&self) -> Tick {
        let instructions = self.instructions.get() + u64::from(self.budget.quantum);
        self.instructions.set(instructions);

        if self.state.get() == ThreadState::ForceTerminate {
            // Alternate: a yield that did not happen is followed by a raise
            return if self.unwinding.replace(!self.unwinding.get()) {
                Tick::Reraise
            } else {
                Tick::Unwind
            };
        }

        if instructions >= self.budget.ceiling {
            self.state.set(ThreadState::ForceTerminate);
            Tick::Terminate
        } else {
            self.state.set(ThreadState::ForceYield);
            Tick::Yield
        }
    }
}

/// Install the count hook on a guest thread
///
/// Replaces whatever hook the Lua state held before.
pub fn install_hook(thread: &Thread, meter: Rc<Meter>, name: &str) {
    let name = name.to_string();
    let triggers = HookTriggers::new().every_nth_instruction(meter.budget().quantum);

    thread.set_hook(triggers, move |_lua, _debug| match meter.tick() {
        Tick::Yield => {
            debug!(
                script = %name,
                instructions = meter.instructions(),
                "Sandbox forcibly yielded"
            );
            Ok(VmState::Yield)
        }
        Tick::Terminate => {
            warn!(
                script = %name,
                instructions = meter.instructions(),
                "Sandbox exceeded instruction limit"
            );
            Err(budget_exceeded(&name, &meter))
        }
        Tick::Unwind => Ok(VmState::Yield),
        Tick::Reraise => Err(budget_exceeded(&name, &meter)),
    });
}

fn budget_exceeded(name: &str, meter: &Meter) -> mlua::Error {
    mlua::Error::external(SandboxError::BudgetExceeded {
        name: name.to_string(),
        instructions: meter.instructions(),
    })
}
