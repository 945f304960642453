//! Sandbox registry
//!
//! Owns the Lua state and the name -> supervisor table. A name is present exactly
//! while its guest thread is open: supervisors remove themselves when they reach a
//! terminal state or are closed.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use mlua::{Lua, Table};
use tracing::{debug, info};

use super::api;
use super::budget::Budget;
use super::environment;
use super::errors::{describe_lua_error, SandboxError};
use super::supervisor::{HookOwner, Supervisor, SupervisorParts, ThreadTable};
use super::values::ScriptValue;
use crate::config::SandboxConfig;

/* ===================== Supervisor Factory ===================== */

/// Strategy deciding how each supervisor is set up
///
/// Passed to `Sandbox::with_factory`. The defaults give a script the bare safe
/// environment and the default budget.
pub trait SupervisorFactory {
    /// Budget for a new script, unless the load call overrides it
    fn budget(&self) -> Budget {
        Budget::default()
    }

    /// Populate the script's environment before any API is installed
    fn init_environment(&self, _lua: &Lua, _env: &Table, _script: &str) -> mlua::Result<()> {
        Ok(())
    }

    /// Install host functions into the script's environment
    fn init_api(&self, _lua: &Lua, _env: &Table, _script: &str) -> mlua::Result<()> {
        Ok(())
    }
}

/// Factory used by `Sandbox::new`: default budget plus the sample `api` table
#[derive(Debug, Clone, Default)]
pub struct DefaultFactory {
    pub budget: Budget,
}

impl DefaultFactory {
    pub fn new(budget: Budget) -> Self {
        Self { budget }
    }
}

impl SupervisorFactory for DefaultFactory {
    fn budget(&self) -> Budget {
        self.budget
    }

    fn init_api(&self, lua: &Lua, env: &Table, script: &str) -> mlua::Result<()> {
        api::install(lua, env, script)
    }
}

/// Per-load overrides
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replaces the factory's budget for this script
    pub budget: Option<Budget>,
    /// Globals bound before the first run
    pub globals: Vec<(String, ScriptValue)>,
}

/* ===================== Registry ===================== */

/// Registry of supervised scripts sharing one Lua state
pub struct Sandbox {
    lua: Rc<Lua>,
    base: Table,
    threads: Rc<ThreadTable>,
    factory: Box<dyn SupervisorFactory>,
    next_index: Cell<usize>,
    hook_owner: HookOwner,
}

impl Sandbox {
    /// Sandbox with the default factory
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_factory(DefaultFactory::default())
    }

    /// Sandbox whose default budget comes from configuration
    pub fn from_config(config: &SandboxConfig) -> Result<Self, SandboxError> {
        Self::with_factory(DefaultFactory::new(config.budget()))
    }

    pub fn with_factory(factory: impl SupervisorFactory + 'static) -> Result<Self, SandboxError> {
        let lua = Lua::new();
        let base = environment::create_base(&lua)?;

        Ok(Self {
            lua: Rc::new(lua),
            base,
            threads: Rc::new(RefCell::new(HashMap::new())),
            factory: Box::new(factory),
            next_index: Cell::new(0),
            hook_owner: Rc::new(Cell::new(None)),
        })
    }

    /// Compile `code` and register it under `name`
    ///
    /// A supervisor already registered under `name` is closed first. On a compile
    /// error or an invalid budget the registry is left untouched.
    pub fn load_code(&self, code: &str, name: &str) -> Result<Supervisor, SandboxError> {
        self.load_code_with(code, name, LoadOptions::default())
    }

    pub fn load_code_with(
        &self,
        code: &str,
        name: &str,
        options: LoadOptions,
    ) -> Result<Supervisor, SandboxError> {
        let budget = options.budget.unwrap_or_else(|| self.factory.budget());
        budget.validate()?;

        let env = environment::create_environment(&self.lua, &self.base, name)?;
        self.factory.init_environment(&self.lua, &env, name)?;
        self.factory.init_api(&self.lua, &env, name)?;

        let index = self.next_index.get();
        let supervisor = Supervisor::new(SupervisorParts {
            lua: Rc::clone(&self.lua),
            name: name.to_string(),
            source: code.to_string(),
            index,
            env,
            budget,
            registry: Rc::downgrade(&self.threads),
            hook_owner: Rc::clone(&self.hook_owner),
        })?;

        for (global, value) in options.globals {
            supervisor.set(&global, value)?;
        }

        // Only now that construction can no longer fail does the old entry go
        self.delete_thread(name);
        self.next_index.set(index + 1);
        self.threads
            .borrow_mut()
            .insert(name.to_string(), supervisor.clone());

        info!(script = %name, index, budget = ?supervisor.budget(), "Script loaded");
        Ok(supervisor)
    }

    /// Compile without registering anything
    pub fn check_code(&self, code: &str, name: &str) -> Result<(), SandboxError> {
        self.lua
            .load(code)
            .set_name(name)
            .into_function()
            .map(|_| ())
            .map_err(|err| SandboxError::Compile {
                name: name.to_string(),
                message: describe_lua_error(&err),
            })
    }

    /// Remove `name` and close its supervisor; no-op when absent
    pub fn delete_thread(&self, name: &str) {
        // Release the table borrow before closing: close() deregisters
        let removed = self.threads.borrow_mut().remove(name);
        if let Some(supervisor) = removed {
            debug!(script = %name, "Deleting thread");
            supervisor.close();
        }
    }

    pub fn get_thread(&self, name: &str) -> Option<Supervisor> {
        self.threads.borrow().get(name).cloned()
    }

    /// All registered supervisors, sorted by name
    pub fn get_threads(&self) -> Vec<(String, Supervisor)> {
        let mut threads: Vec<(String, Supervisor)> = self
            .threads
            .borrow()
            .iter()
            .map(|(name, supervisor)| (name.clone(), supervisor.clone()))
            .collect();
        threads.sort_by(|a, b| a.0.cmp(&b.0));
        threads
    }

    pub fn len(&self) -> usize {
        self.threads.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.borrow().is_empty()
    }

    /// Close every registered supervisor
    pub fn close_all(&self) {
        let names: Vec<String> = self.threads.borrow().keys().cloned().collect();
        for name in names {
            self.delete_thread(&name);
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.close_all();
    }
}
