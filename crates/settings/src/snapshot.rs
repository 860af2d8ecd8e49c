//! Post-load snapshot of script-defined globals
//!
//! Everything bound beyond the base set is captured into a generic table
//! structure with callable members stripped out (they would not survive the
//! environment teardown), plus a one-time JSON conversion. Both forms are
//! rebuilt wholesale on every load, never merged.

use crate::environment::Environment;
use crate::value::Value;
use crate::Result;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    tables: HashMap<String, Value>,
    json: serde_json::Value,
}

impl Snapshot {
    /// Capture all added globals from the environment
    pub fn capture(env: &Environment) -> Result<Snapshot> {
        let mut tables = HashMap::new();
        for (key, value) in env.added_globals()? {
            if value.is_function() {
                continue;
            }
            tables.insert(key, Value::from_lua(&value)?);
        }

        let json = serde_json::Value::Object(
            tables
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        );

        Ok(Snapshot { tables, json })
    }

    /// Look up a captured global as a generic table value
    pub fn raw_table(&self, key: &str) -> Option<&Value> {
        self.tables.get(key)
    }

    /// Look up a captured global as JSON
    pub fn raw_json(&self, key: &str) -> Option<&serde_json::Value> {
        self.json.get(key)
    }
}
