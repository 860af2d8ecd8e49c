//! Script environment construction
//!
//! Every load gets a fresh Lua state. Registration order is fixed:
//! built-in packages first, then user method packages (which may shadow a
//! built-in of the same name), extension functions, user tables and delegate
//! functions. The base global set is recorded at that point; plain user
//! globals and the seeded section tables come after it, so they show up as
//! "added" globals alongside anything the scripts define.

use crate::packages;
use crate::registry::SectionRegistry;
use crate::value::{json_to_lua, Value};
use crate::Result;
use mlua::prelude::*;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

/// A host function callable from scripts
///
/// Shared so registrations survive across loads; each load re-binds the
/// function into the fresh Lua state.
pub type HostFunction = Rc<dyn Fn(&Lua, LuaMultiValue) -> LuaResult<LuaMultiValue>>;

/// A named group of host functions, registered as one global table
///
/// Registering a package named `os` or `log` shadows the built-in of the
/// same name.
pub struct MethodPackage {
    pub(crate) name: String,
    pub(crate) functions: Vec<(String, HostFunction)>,
}

impl MethodPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Add a named function to the package
    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Lua, LuaMultiValue) -> LuaResult<LuaMultiValue> + 'static,
    {
        self.functions.push((name.into(), Rc::new(function)));
        self
    }
}

/// A function installed onto an existing global table (e.g. `string`),
/// callable through method syntax from scripts
pub(crate) struct Extension {
    pub target: String,
    pub name: String,
    pub function: HostFunction,
}

/// Everything the host registered before loading
#[derive(Default)]
pub(crate) struct Registrations {
    pub packages: Vec<MethodPackage>,
    pub extensions: Vec<Extension>,
    pub tables: Vec<(String, Value)>,
    pub delegates: Vec<(String, HostFunction)>,
    pub globals: Vec<(String, Value)>,
}

/// Exclusive owner of all bindings created during one load
///
/// Dropped when the load call returns; nothing obtained from it may
/// outlive that point. Only materialized copies (JSON, typed instances,
/// snapshot values) survive.
pub(crate) struct Environment {
    lua: Lua,
    base_globals: HashSet<String>,
}

impl Environment {
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Globals bound after the base set was recorded, sorted by name
    pub fn added_globals(&self) -> Result<Vec<(String, LuaValue)>> {
        let mut added = Vec::new();
        for pair in self.lua.globals().pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            if let LuaValue::String(s) = key {
                let name = s.to_str()?.to_string();
                if !self.base_globals.contains(&name) {
                    added.push((name, value));
                }
            }
        }
        added.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(added)
    }

    /// Read one global binding
    pub fn get_global(&self, key: &str) -> Result<LuaValue> {
        Ok(self.lua.globals().get(key)?)
    }
}

/// Builds a fresh environment for one load call
pub(crate) struct EnvironmentBuilder<'a> {
    registry: &'a SectionRegistry,
    registrations: &'a Registrations,
    config_root: &'a Path,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(
        registry: &'a SectionRegistry,
        registrations: &'a Registrations,
        config_root: &'a Path,
    ) -> Self {
        Self {
            registry,
            registrations,
            config_root,
        }
    }

    /// Construct the environment and the placeholder instance map
    ///
    /// Placeholders are default-valued section instances; they are replaced
    /// by materialized instances after execution.
    pub fn build(&self) -> Result<(Environment, HashMap<String, Box<dyn Any>>)> {
        let lua = Lua::new();

        // Built-ins first, fixed names
        packages::os::register(&lua, self.config_root)?;
        packages::log::register(&lua)?;

        for package in &self.registrations.packages {
            let table = lua.create_table()?;
            for (name, function) in &package.functions {
                table.set(name.as_str(), Self::bind(&lua, function)?)?;
            }
            lua.globals().set(package.name.as_str(), table)?;
        }

        for extension in &self.registrations.extensions {
            let target: LuaTable = match lua.globals().get(extension.target.as_str())? {
                LuaValue::Table(t) => t,
                _ => {
                    let t = lua.create_table()?;
                    lua.globals().set(extension.target.as_str(), t.clone())?;
                    t
                }
            };
            target.set(extension.name.as_str(), Self::bind(&lua, &extension.function)?)?;
        }

        for (key, value) in &self.registrations.tables {
            lua.globals().set(key.as_str(), value.into_lua(&lua)?)?;
        }

        for (key, function) in &self.registrations.delegates {
            lua.globals().set(key.as_str(), Self::bind(&lua, function)?)?;
        }

        let base_globals = Self::global_names(&lua)?;

        for (key, value) in &self.registrations.globals {
            lua.globals().set(key.as_str(), value.into_lua(&lua)?)?;
        }

        // Seed each section with its type's defaults so un-assigned fields
        // fall back to host-declared values
        let mut placeholders: HashMap<String, Box<dyn Any>> = HashMap::new();
        for descriptor in self.registry.descriptors() {
            let defaults = descriptor.binding.default_json()?;
            let table = json_to_lua(&lua, &defaults)?;
            lua.globals().set(descriptor.key.as_str(), table)?;
            placeholders.insert(descriptor.key.clone(), descriptor.binding.default_instance());
        }

        Ok((Environment { lua, base_globals }, placeholders))
    }

    fn bind(lua: &Lua, function: &HostFunction) -> LuaResult<LuaFunction> {
        let function = Rc::clone(function);
        lua.create_function(move |lua, args: LuaMultiValue| function(lua, args))
    }

    fn global_names(lua: &Lua) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
            let (key, _) = pair?;
            if let LuaValue::String(s) = key {
                names.insert(s.to_str()?.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Default)]
    struct CacheSettings {
        capacity: i64,
        path: String,
    }

    fn build_env(registry: &SectionRegistry, registrations: &Registrations) -> Environment {
        let dir = std::env::temp_dir();
        let builder = EnvironmentBuilder::new(registry, registrations, &dir);
        builder.build().unwrap().0
    }

    #[test]
    fn test_sections_are_seeded_with_defaults() {
        let mut registry = SectionRegistry::new();
        registry.register::<CacheSettings>("CacheSettings").unwrap();
        let registrations = Registrations::default();

        let env = build_env(&registry, &registrations);
        let value = env.get_global("CacheSettings").unwrap();
        let seeded = Value::from_lua(&value).unwrap();
        let map = seeded.as_map().unwrap();
        assert_eq!(map["capacity"].as_i64().unwrap(), 0);
        assert_eq!(map["path"].as_str().unwrap(), "");
    }

    #[test]
    fn test_seeded_sections_count_as_added_globals() {
        let mut registry = SectionRegistry::new();
        registry.register::<CacheSettings>("CacheSettings").unwrap();
        let registrations = Registrations::default();

        let env = build_env(&registry, &registrations);
        let added = env.added_globals().unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].0, "CacheSettings");
    }

    #[test]
    fn test_user_package_and_delegate_are_callable() {
        let registry = SectionRegistry::new();
        let mut registrations = Registrations::default();
        registrations.packages.push(
            MethodPackage::new("mathx").with_function("double", |lua, args: LuaMultiValue| {
                let n: i64 = i64::from_lua_multi(args, lua)?;
                (n * 2).into_lua_multi(lua)
            }),
        );
        registrations.delegates.push((
            "triple".to_string(),
            Rc::new(|lua, args: LuaMultiValue| {
                let n: i64 = i64::from_lua_multi(args, lua)?;
                (n * 3).into_lua_multi(lua)
            }),
        ));

        let env = build_env(&registry, &registrations);
        env.lua()
            .load("a = mathx.double(21)\nb = triple(7)")
            .exec()
            .unwrap();
        let a: i64 = env.lua().globals().get("a").unwrap();
        let b: i64 = env.lua().globals().get("b").unwrap();
        assert_eq!(a, 42);
        assert_eq!(b, 21);
    }

    #[test]
    fn test_user_package_shadows_builtin() {
        let registry = SectionRegistry::new();
        let mut registrations = Registrations::default();
        registrations.packages.push(MethodPackage::new("log").with_function(
            "info",
            |lua, _args: LuaMultiValue| "shadowed".into_lua_multi(lua),
        ));

        let env = build_env(&registry, &registrations);
        env.lua().load("r = log.info(\"x\")").exec().unwrap();
        let r: String = env.lua().globals().get("r").unwrap();
        assert_eq!(r, "shadowed");
    }

    #[test]
    fn test_user_globals_and_tables() {
        let registry = SectionRegistry::new();
        let mut registrations = Registrations::default();
        registrations
            .globals
            .push(("build_id".to_string(), Value::from(77i64)));
        let mut defaults = HashMap::new();
        defaults.insert("endpoint".to_string(), Value::from("localhost"));
        registrations
            .tables
            .push(("Shared".to_string(), Value::Map(defaults)));

        let env = build_env(&registry, &registrations);
        env.lua()
            .load("x = build_id\ny = Shared.endpoint")
            .exec()
            .unwrap();
        let x: i64 = env.lua().globals().get("x").unwrap();
        let y: String = env.lua().globals().get("y").unwrap();
        assert_eq!(x, 77);
        assert_eq!(y, "localhost");

        // Tables registered pre-count belong to the base set, globals do not
        let added = env.added_globals().unwrap();
        let names: Vec<_> = added.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"build_id"));
        assert!(!names.contains(&"Shared"));
    }
}
