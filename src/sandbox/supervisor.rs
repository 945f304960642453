//! Execution supervisor
//!
//! One `Supervisor` drives one guest thread through its resume/yield/terminate
//! protocol. `run()` keeps resuming until the guest hands control back to the
//! caller (plain yield) or reaches a terminal state:
//!
//! - forced yields from the budget hook are resumed immediately, after letting the
//!   executor run other tasks
//! - pending host values are awaited and fed back into the guest
//! - completion, guest errors and budget termination close the thread and remove
//!   the script from its registry
//!
//! The guest runs as a Lua coroutine inside a host-side driver thread, and only the
//! driver is ever resumed from Rust. A guest interrupted by the count hook is
//! suspended mid-instruction, and resuming it through `coroutine.resume` keeps its
//! stack exactly as the hook left it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use mlua::{Function, IntoLua, Lua, MultiValue, Table, Thread, ThreadStatus, Value};
use tracing::debug;

use super::bridge;
use super::budget::{self, Budget, Meter};
use super::environment;
use super::errors::{describe_lua_error, SandboxError};
use super::state::ThreadState;
use super::values::ScriptValue;

/// Registry table a supervisor removes itself from
pub(crate) type ThreadTable = RefCell<HashMap<String, Supervisor>>;

/// Index of the supervisor whose guest currently holds the Lua state's count hook
pub(crate) type HookOwner = Rc<Cell<Option<usize>>>;

const DRIVER_PRELUDE: &str = r#"
local resume, yield, status = coroutine.resume, coroutine.yield, coroutine.status
local pack, unpack = table.pack, table.unpack
return function(co)
    return function(...)
        local args = pack(...)
        while true do
            local results = pack(resume(co, unpack(args, 1, args.n)))
            if status(co) == "dead" then
                if results[1] then
                    return unpack(results, 2, results.n)
                end
                error(results[2], 0)
            end
            args = pack(yield(unpack(results, 2, results.n)))
        end
    end
end
"#;

/// Everything needed to construct a supervisor
pub(crate) struct SupervisorParts {
    pub lua: Rc<Lua>,
    pub name: String,
    pub source: String,
    pub index: usize,
    pub env: Table,
    pub budget: Budget,
    pub registry: Weak<ThreadTable>,
    pub hook_owner: HookOwner,
}

/// The guest coroutine and the driver thread resuming it
#[derive(Clone)]
struct Threads {
    driver: Thread,
    guest: Thread,
}

/// Handle to a supervised script
///
/// Cloning is cheap and every clone refers to the same guest thread.
#[derive(Clone)]
pub struct Supervisor {
    inner: Rc<Inner>,
}

struct Inner {
    name: String,
    source: String,
    index: usize,
    lua: Rc<Lua>,
    env: Table,
    /// `None` once closed
    threads: RefCell<Option<Threads>>,
    meter: Rc<Meter>,
    hook_owner: HookOwner,
    run_count: Cell<u64>,
    running: Cell<bool>,
    results: RefCell<Option<Vec<ScriptValue>>>,
    registry: Weak<ThreadTable>,
}

/// Clears the in-flight flag even if the `run()` future is dropped mid-await
struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Supervisor {
    /// Compile the source and prepare a suspended guest thread
    ///
    /// Fails with `SandboxError::Compile` on a syntax error. Nothing is registered
    /// here; that is the registry's job once construction succeeded.
    pub(crate) fn new(parts: SupervisorParts) -> Result<Self, SandboxError> {
        let function = parts
            .lua
            .load(parts.source.as_str())
            .set_name(parts.name.as_str())
            .set_environment(parts.env.clone())
            .into_function()
            .map_err(|err| SandboxError::Compile {
                name: parts.name.clone(),
                message: describe_lua_error(&err),
            })?;

        let meter = Rc::new(Meter::new(parts.budget));
        let mark = parts.lua.create_function({
            let meter = Rc::clone(&meter);
            move |_, ()| {
                meter.clear_forced_yield();
                Ok(())
            }
        })?;
        parts
            .env
            .raw_set("coroutine", environment::create_coroutine(&parts.lua, mark)?)?;

        let check = parts.lua.create_function({
            let meter = Rc::clone(&meter);
            let name = parts.name.clone();
            move |_, ()| meter.check_terminated(&name)
        })?;
        let (pcall, xpcall) = environment::create_protected_calls(&parts.lua, check)?;
        parts.env.raw_set("pcall", pcall)?;
        parts.env.raw_set("xpcall", xpcall)?;

        let guest = parts.lua.create_thread(function)?;
        let proxy: Function = parts
            .lua
            .load(DRIVER_PRELUDE)
            .set_name("=supervisor")
            .call::<Function>(())?
            .call(guest.clone())?;
        let driver = parts.lua.create_thread(proxy)?;

        Ok(Self {
            inner: Rc::new(Inner {
                name: parts.name,
                source: parts.source,
                index: parts.index,
                lua: parts.lua,
                env: parts.env,
                threads: RefCell::new(Some(Threads { driver, guest })),
                meter,
                hook_owner: parts.hook_owner,
                run_count: Cell::new(0),
                running: Cell::new(false),
                results: RefCell::new(None),
                registry: parts.registry,
            }),
        })
    }

    /* ===================== Accessors ===================== */

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Creation order within the owning registry
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn budget(&self) -> Budget {
        self.inner.meter.budget()
    }

    pub fn state(&self) -> ThreadState {
        self.inner.meter.state()
    }

    pub fn run_count(&self) -> u64 {
        self.inner.run_count.get()
    }

    pub fn instruction_count(&self) -> u64 {
        self.inner.meter.instructions()
    }

    /// Values surfaced by the most recent resume cycle
    pub fn results(&self) -> Option<Vec<ScriptValue>> {
        self.inner.results.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.threads.borrow().is_none()
    }

    /// Bind a global in this script's environment
    pub fn set(&self, name: &str, value: impl IntoLua) -> Result<(), SandboxError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.inner.env.set(name, value)?;
        Ok(())
    }

    /* ===================== Execution ===================== */

    /// Drive the guest until it yields a plain value or terminates
    ///
    /// Guest errors and budget violations are reported through `state()` and the
    /// returned results, never as `Err`. `Err` means the call was not accepted:
    /// the thread is already closed, or another `run()` is in flight.
    pub async fn run(&self) -> Result<Option<Vec<ScriptValue>>, SandboxError> {
        let threads = self
            .inner
            .threads
            .borrow()
            .clone()
            .ok_or_else(|| self.closed_error())?;

        if self.inner.running.replace(true) {
            return Err(SandboxError::Busy {
                name: self.inner.name.clone(),
            });
        }
        let _guard = RunGuard(&self.inner.running);

        let run_count = self.inner.run_count.get() + 1;
        self.inner.run_count.set(run_count);

        self.execute(&threads).await;

        let state = self.state();
        debug!(
            script = %self.inner.name,
            run_count,
            instructions = self.instruction_count(),
            state = %state,
            "Run finished"
        );

        if state.is_terminal() {
            drop(threads);
            self.close();
        }

        Ok(self.results())
    }

    /// The resume loop
    async fn execute(&self, threads: &Threads) {
        let meter = &self.inner.meter;
        meter.set_state(ThreadState::Running);

        let mut resume_args: Vec<Value> = Vec::new();

        while meter.state() == ThreadState::Running {
            self.claim_hook(&threads.guest);
            let outcome = threads
                .driver
                .resume::<MultiValue>(MultiValue::from_vec(std::mem::take(&mut resume_args)));

            // The hook may have terminated the guest even if the resume itself
            // returned normally (it yielded from code running after termination)
            if meter.state() == ThreadState::ForceTerminate {
                self.set_results(None);
                break;
            }

            let values: Vec<Value> = match outcome {
                Ok(values) => values.into_iter().collect(),
                Err(err) => {
                    let message = describe_lua_error(&err);
                    self.set_results(Some(vec![ScriptValue::Str(message)]));
                    meter.set_state(ThreadState::Error);
                    break;
                }
            };

            if threads.driver.status() != ThreadStatus::Resumable {
                let results = (!values.is_empty()).then(|| ScriptValue::capture_all(&values));
                self.set_results(results);
                meter.set_state(ThreadState::Completed);
                break;
            }

            if meter.state() == ThreadState::ForceYield && values.is_empty() {
                meter.set_state(ThreadState::Running);
                tokio::task::yield_now().await;
                if self.abandoned() {
                    break;
                }
                continue;
            }
            // The hook fired where it could not yield, then the guest yielded values
            meter.set_state(ThreadState::Running);

            let pending = values.first().and_then(bridge::take_pending);
            match pending {
                Some(pending) => {
                    self.set_results(Some(ScriptValue::capture_all(&values[1..])));
                    drop(values);

                    debug!(script = %self.inner.name, "Awaiting pending host value");
                    match bridge::settle(&self.inner.lua, pending).await {
                        Ok(args) => resume_args = args,
                        Err(err) => {
                            let message = describe_lua_error(&err);
                            self.set_results(Some(vec![ScriptValue::Str(message)]));
                            meter.set_state(ThreadState::Error);
                            break;
                        }
                    }
                    if self.abandoned() {
                        break;
                    }
                }
                None => {
                    self.set_results(Some(ScriptValue::capture_all(&values)));
                    meter.set_state(ThreadState::Yield);
                }
            }
        }
    }

    /// The Lua state keeps one count hook, so take it back from whichever guest ran last
    fn claim_hook(&self, guest: &Thread) {
        let owner = &self.inner.hook_owner;
        if owner.get() != Some(self.inner.index) {
            budget::install_hook(guest, Rc::clone(&self.inner.meter), &self.inner.name);
            owner.set(Some(self.inner.index));
        }
    }

    /// Closed from elsewhere while this run was suspended
    fn abandoned(&self) -> bool {
        if !self.is_closed() {
            return false;
        }
        self.inner.meter.set_state(ThreadState::ForceTerminate);
        self.set_results(None);
        true
    }

    fn set_results(&self, results: Option<Vec<ScriptValue>>) {
        *self.inner.results.borrow_mut() = results;
    }

    /* ===================== Teardown ===================== */

    /// Release the guest thread and leave the registry
    ///
    /// Safe to call any number of times.
    pub fn close(&self) {
        let released = self.inner.threads.borrow_mut().take();
        if released.is_some() {
            debug!(script = %self.inner.name, state = %self.state(), "Guest thread closed");
        }
        drop(released);
        self.deregister();
    }

    /// Remove this supervisor's entry, unless the name now belongs to a newer one
    fn deregister(&self) {
        let Some(registry) = self.inner.registry.upgrade() else {
            return;
        };

        let removed = {
            let mut threads = registry.borrow_mut();
            let is_current = threads
                .get(&self.inner.name)
                .is_some_and(|current| current.same_as(self));
            if is_current {
                threads.remove(&self.inner.name)
            } else {
                None
            }
        };
        drop(removed);
    }

    fn closed_error(&self) -> SandboxError {
        SandboxError::Closed {
            name: self.inner.name.clone(),
        }
    }

    pub(crate) fn same_as(&self, other: &Supervisor) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.inner.name)
            .field("index", &self.inner.index)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("instructions", &self.instruction_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
