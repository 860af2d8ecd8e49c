//! Generic script value type
//!
//! `Value` is the portable form of a Lua value: everything a script can
//! define except functions, userdata and coroutines, which are not valid
//! once the owning environment is torn down. Conversions to and from the
//! canonical JSON representation live here as well.

use crate::Result;
use mlua::prelude::*;
use std::collections::{HashMap, HashSet};

/// A value captured from a script environment
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null/empty value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Map of string keys to values
    Map(HashMap<String, Value>),
}

impl Value {
    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to get as array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr.as_slice()),
            _ => None,
        }
    }

    /// Try to get as map
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a Lua value into a portable `Value`
    ///
    /// Function, userdata and thread values become `Null`; function-valued
    /// members of map-like tables are dropped entirely. A table with a
    /// non-empty array part converts as an array, so named members of such
    /// a mixed table are not carried over. A table reached through itself
    /// converts as `Null` at the point of re-entry.
    pub fn from_lua(value: &LuaValue) -> Result<Value> {
        let mut visiting = HashSet::new();
        Self::from_lua_guarded(value, &mut visiting)
    }

    fn from_lua_guarded(value: &LuaValue, visiting: &mut HashSet<usize>) -> Result<Value> {
        match value {
            LuaValue::Nil => Ok(Value::Null),
            LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
            LuaValue::Integer(i) => Ok(Value::Int(*i)),
            LuaValue::Number(n) => Ok(Value::Float(*n)),
            LuaValue::String(s) => Ok(Value::String(s.to_str()?.to_string())),
            LuaValue::Table(t) => Self::from_lua_table(t, visiting),
            _ => Ok(Value::Null),
        }
    }

    fn from_lua_table(table: &LuaTable, visiting: &mut HashSet<usize>) -> Result<Value> {
        // Identity of every table on the current conversion path; a table
        // reached through itself would otherwise recurse forever
        let id = table.to_pointer() as usize;
        if !visiting.insert(id) {
            return Ok(Value::Null);
        }

        // Sequential integer keys starting from 1 mean an array
        let len = table.raw_len();
        let result = if len > 0 {
            let mut arr = Vec::with_capacity(len);
            for i in 1..=len {
                let v: LuaValue = table.raw_get(i)?;
                arr.push(Value::from_lua_guarded(&v, visiting)?);
            }
            Ok(Value::Array(arr))
        } else {
            let mut map = HashMap::new();
            for pair in table.pairs::<String, LuaValue>() {
                let (k, v) = pair?;
                if v.is_function() {
                    continue;
                }
                map.insert(k, Value::from_lua_guarded(&v, visiting)?);
            }
            Ok(Value::Map(map))
        };

        // Path-scoped: a table shared by two siblings still converts in
        // both places
        visiting.remove(&id);
        result
    }

    /// Convert into a Lua value inside the given state
    pub fn into_lua(&self, lua: &Lua) -> mlua::Result<LuaValue> {
        match self {
            Value::Null => Ok(LuaValue::Nil),
            Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
            Value::Int(i) => Ok(LuaValue::Integer(*i)),
            Value::Float(f) => Ok(LuaValue::Number(*f)),
            Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
            Value::Array(arr) => {
                let table = lua.create_table()?;
                for (i, v) in arr.iter().enumerate() {
                    table.raw_set(i + 1, v.into_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
            Value::Map(map) => {
                let table = lua.create_table()?;
                for (k, v) in map {
                    table.raw_set(k.as_str(), v.into_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
        }
    }

    /// Convert into the canonical JSON representation
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let obj = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Build a `Value` from the canonical JSON representation
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Convert a JSON value into a Lua value inside the given state
pub(crate) fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<LuaValue> {
    Value::from_json(value).into_lua(lua)
}

/// Convert a Lua value into JSON, dropping function-valued members
pub(crate) fn lua_to_json(value: &LuaValue) -> Result<serde_json::Value> {
    Ok(Value::from_lua(value)?.to_json())
}

// Conversion from common types

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(m: HashMap<String, T>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        v.to_json()
    }
}
