//! Sample host API exposed to scripts as the global `api`
//!
//! - `api.log(msg)`: synchronous, logs through tracing
//! - `api.sleep(ms)`: pending, settles to `nil` after the delay
//! - `api.echo(v)`: pending, settles to `v`
//! - `api.fail(msg)`: pending, fails with `msg`

use std::time::Duration;

use mlua::{Lua, Table, Value};
use tracing::info;

use super::bridge::PendingValue;
use super::errors::HostError;
use super::values::ScriptValue;

/// Install the `api` table into a script environment
pub fn install(lua: &Lua, env: &Table, script: &str) -> mlua::Result<()> {
    let api = lua.create_table()?;

    let name = script.to_string();
    api.raw_set(
        "log",
        lua.create_function(move |_, message: String| {
            info!(script = %name, "api.log: {}", message);
            Ok(())
        })?,
    )?;

    api.raw_set(
        "sleep",
        lua.create_function(|lua, ms: u64| {
            PendingValue::create(lua, async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ScriptValue::Nil)
            })
        })?,
    )?;

    api.raw_set(
        "echo",
        lua.create_function(|lua, value: Value| {
            let value = ScriptValue::capture(&value);
            PendingValue::create(lua, async move {
                tokio::task::yield_now().await;
                Ok(value)
            })
        })?,
    )?;

    api.raw_set(
        "fail",
        lua.create_function(|lua, message: String| {
            PendingValue::create(lua, async move { Err(HostError::new(message)) })
        })?,
    )?;

    env.raw_set("api", api)
}
