//! Host-side snapshots of Lua values
//!
//! Results leave the guest as `ScriptValue`s so callers never hold references into
//! the Lua state, and settled host values enter the guest the same way.

use mlua::{IntoLua, Lua, Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tables nested deeper than this are captured as `Opaque("table")`
pub const MAX_CAPTURE_DEPTH: usize = 32;

/// Runtime value snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    /// Sequence table (keys 1..n)
    List(Vec<ScriptValue>),
    /// Any other table, keys rendered as strings
    Map(BTreeMap<String, ScriptValue>),
    /// Functions, threads and userdata, kept as their type name
    Opaque(String),
}

impl ScriptValue {
    /// Snapshot a Lua value
    pub fn capture(value: &Value) -> Self {
        capture_at(value, 0)
    }

    /// Snapshot a list of Lua values (e.g. a resume result)
    pub fn capture_all(values: &[Value]) -> Vec<Self> {
        values.iter().map(ScriptValue::capture).collect()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::Str(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::Str(s)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        ScriptValue::Int(n)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Num(n)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

/* ===================== Lua -> Host ===================== */

fn capture_at(value: &Value, depth: usize) -> ScriptValue {
    match value {
        Value::Nil => ScriptValue::Nil,
        Value::Boolean(b) => ScriptValue::Bool(*b),
        Value::Integer(n) => ScriptValue::Int(*n),
        Value::Number(n) => ScriptValue::Num(*n),
        Value::String(s) => ScriptValue::Str(s.to_string_lossy().to_string()),
        Value::Table(table) if depth < MAX_CAPTURE_DEPTH => capture_table(table, depth),
        other => ScriptValue::Opaque(other.type_name().to_string()),
    }
}

fn capture_table(table: &Table, depth: usize) -> ScriptValue {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        match pair {
            Ok(entry) => entries.push(entry),
            Err(_) => return ScriptValue::Opaque("table".to_string()),
        }
    }

    let len = table.raw_len();
    if len > 0 && entries.len() == len {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item = table.raw_get::<Value>(i).unwrap_or(Value::Nil);
            items.push(capture_at(&item, depth + 1));
        }
        return ScriptValue::List(items);
    }

    let map = entries
        .iter()
        .map(|(k, v)| (key_to_string(k), capture_at(v, depth + 1)))
        .collect();
    ScriptValue::Map(map)
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.type_name().to_string(),
    }
}

/* ===================== Host -> Lua ===================== */

impl IntoLua for ScriptValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            ScriptValue::Nil | ScriptValue::Opaque(_) => Value::Nil,
            ScriptValue::Bool(b) => Value::Boolean(b),
            ScriptValue::Int(n) => Value::Integer(n),
            ScriptValue::Num(n) => Value::Number(n),
            ScriptValue::Str(s) => Value::String(lua.create_string(&s)?),
            ScriptValue::List(items) => {
                let table = lua.create_table_with_capacity(items.len(), 0)?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item)?;
                }
                Value::Table(table)
            }
            ScriptValue::Map(map) => {
                let table = lua.create_table_with_capacity(0, map.len())?;
                for (key, item) in map {
                    table.raw_set(key, item)?;
                }
                Value::Table(table)
            }
        })
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => f.write_str("nil"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int(n) => write!(f, "{}", n),
            ScriptValue::Num(n) => write!(f, "{}", n),
            ScriptValue::Str(s) => f.write_str(s),
            ScriptValue::Opaque(type_name) => write!(f, "<{}>", type_name),
            ScriptValue::List(_) | ScriptValue::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}
