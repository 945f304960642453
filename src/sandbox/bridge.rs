//! Host/guest asynchronous value bridge
//!
//! A host function that has to wait on something (I/O, timers) returns a
//! `PendingValue` to the guest instead of blocking. The guest hands it back by
//! yielding it, normally through the `await` prelude function:
//!
//! ```lua
//! local body = await(api.echo("payload"))
//! ```
//!
//! The supervisor spots the pending value at the head of the yielded values, awaits
//! the wrapped future on the host side and resumes the guest with `(true, value)` or
//! `(false, message)`. `await` turns the latter into a Lua error.

use std::future::Future;
use std::pin::Pin;

use mlua::{AnyUserData, Function, IntoLua, Lua, UserData, Value};

use super::errors::HostError;
use super::values::ScriptValue;

/// Future produced by a deferred host operation
pub type HostFuture = Pin<Box<dyn Future<Output = Result<ScriptValue, HostError>>>>;

/// Lua source of the `await` prelude function
const AWAIT_PRELUDE: &str = r#"
local yield = coroutine.yield
return function(value)
    local ok, result = yield(value)
    if ok == false then
        error(result, 2)
    end
    return result
end
"#;

/// Marker for a host result that is still outstanding
///
/// The future can be taken exactly once. A second `await` on the same value settles
/// with an error.
pub struct PendingValue {
    future: Option<HostFuture>,
}

impl PendingValue {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<ScriptValue, HostError>> + 'static,
    {
        Self {
            future: Some(Box::pin(future)),
        }
    }

    /// Wrap a future as Lua userdata, ready to be returned from a host function
    pub fn create<F>(lua: &Lua, future: F) -> mlua::Result<AnyUserData>
    where
        F: Future<Output = Result<ScriptValue, HostError>> + 'static,
    {
        lua.create_userdata(PendingValue::new(future))
    }

    pub fn take(&mut self) -> Option<HostFuture> {
        self.future.take()
    }
}

impl UserData for PendingValue {}

/// If `value` is a pending host value, take its future
///
/// Returns `None` for anything else. A pending value whose future was already
/// consumed yields a future that fails immediately.
pub fn take_pending(value: &Value) -> Option<HostFuture> {
    let Value::UserData(userdata) = value else {
        return None;
    };
    if !userdata.is::<PendingValue>() {
        return None;
    }

    let future = userdata
        .borrow_mut::<PendingValue>()
        .ok()
        .and_then(|mut pending| pending.take());

    Some(future.unwrap_or_else(|| {
        Box::pin(async { Err(HostError::new("pending value already consumed")) })
    }))
}

/// Settle a pending future into the values the guest is resumed with
pub async fn settle(lua: &Lua, future: HostFuture) -> mlua::Result<Vec<Value>> {
    match future.await {
        Ok(value) => Ok(vec![Value::Boolean(true), value.into_lua(lua)?]),
        Err(err) => Ok(vec![
            Value::Boolean(false),
            Value::String(lua.create_string(err.to_string())?),
        ]),
    }
}

/// Compile the `await` prelude against the real globals
pub fn create_await(lua: &Lua) -> mlua::Result<Function> {
    lua.load(AWAIT_PRELUDE).set_name("=await").call(())
}
