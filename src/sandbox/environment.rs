//! Per-script global environments
//!
//! Every script compiles against its own environment table. Reads fall through to a
//! shared base table holding the safe subset of the Lua standard library plus
//! `await`; writes (including `Supervisor::set`) stay in the script's own table.

use mlua::{Function, Lua, MultiValue, Table, Value};
use tracing::info;

use super::bridge;
use super::values::ScriptValue;

/// Globals copied from the Lua state into the shared base
///
/// `os`, `io`, `load`, `loadfile`, `dofile`, `require`, `package` and `debug` are
/// left out. `coroutine`, `pcall` and `xpcall` are bound per script by
/// `create_coroutine` and `create_protected_calls`.
pub const SAFE_GLOBALS: &[&str] = &[
    "assert",
    "error",
    "ipairs",
    "next",
    "pairs",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "select",
    "setmetatable",
    "getmetatable",
    "tonumber",
    "tostring",
    "type",
    "_VERSION",
    "math",
    "string",
    "table",
    "utf8",
];

/// Build the shared, read-only base environment
pub fn create_base(lua: &Lua) -> mlua::Result<Table> {
    let globals = lua.globals();
    let base = lua.create_table()?;

    for name in SAFE_GLOBALS {
        let value: Value = globals.get(*name)?;
        base.raw_set(*name, value)?;
    }
    base.raw_set("await", bridge::create_await(lua)?)?;

    Ok(base)
}

/// Create a fresh environment for one script
///
/// `print` is rebound per script so output is attributed to it in the logs.
pub fn create_environment(lua: &Lua, base: &Table, script: &str) -> mlua::Result<Table> {
    let env = lua.create_table()?;

    let meta = lua.create_table()?;
    meta.raw_set("__index", base.clone())?;
    env.set_metatable(Some(meta));

    let script = script.to_string();
    let print = lua.create_function(move |_, args: MultiValue| {
        let line = args
            .iter()
            .map(|value| ScriptValue::capture(value).to_string())
            .collect::<Vec<_>>()
            .join("\t");
        info!(script = %script, "{}", line);
        Ok(())
    })?;
    env.raw_set("print", print)?;
    env.raw_set("_G", env.clone())?;

    Ok(env)
}

const YIELD_PRELUDE: &str = r#"
local yield = coroutine.yield
return function(mark)
    return function(...)
        mark()
        return yield(...)
    end
end
"#;

/// Build the guest-facing `coroutine` table
///
/// Guests cannot create coroutines of their own: a nested coroutine runs outside
/// the count hook. Only `yield`, `isyieldable` and `running` remain, and `yield`
/// calls `mark` first so the supervisor can tell a voluntary yield apart.
pub fn create_coroutine(lua: &Lua, mark: Function) -> mlua::Result<Table> {
    let real: Table = lua.globals().get("coroutine")?;
    let table = lua.create_table()?;

    let wrap: Function = lua.load(YIELD_PRELUDE).set_name("=yield").call(())?;
    table.raw_set("yield", wrap.call::<Function>(mark)?)?;
    for name in ["isyieldable", "running"] {
        table.raw_set(name, real.get::<Value>(name)?)?;
    }

    Ok(table)
}

const PROTECTED_PRELUDE: &str = r#"
local pcall, xpcall = pcall, xpcall
local pack, unpack = table.pack, table.unpack
return function(check)
    local function settle(results)
        check()
        return unpack(results, 1, results.n)
    end
    return function(...)
        return settle(pack(pcall(...)))
    end, function(...)
        return settle(pack(xpcall(...)))
    end
end
"#;

/// Build the guest-facing `pcall` and `xpcall`
///
/// Both run `check` once the protected call returns. A failing `check` raises
/// past the guest's own handler, so a terminated guest cannot catch its way out.
pub fn create_protected_calls(lua: &Lua, check: Function) -> mlua::Result<(Function, Function)> {
    let wrap: Function = lua.load(PROTECTED_PRELUDE).set_name("=pcall").call(())?;
    wrap.call(check)
}
