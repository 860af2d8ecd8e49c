//! Settings engine
//!
//! `SettingsManager` ties the pieces together for one load call: existence
//! checks, environment construction with default seeding, script
//! compilation and execution, section materialization and the generic
//! snapshot. Loads are fully synchronous and run to completion or fault;
//! one load per manager at a time.

use crate::environment::{EnvironmentBuilder, Extension, MethodPackage, Registrations};
use crate::loader::{LoadOptions, ScriptLoader};
use crate::materialize::materialize_sections;
use crate::registry::{Section, SectionRegistry};
use crate::snapshot::Snapshot;
use crate::tracer::ExecutionTracer;
use crate::value::Value;
use crate::{Error, Result};
use mlua::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Default name of the main settings script inside the configuration root
pub const DEFAULT_MAIN_FILE: &str = "MainSettings.lua";

/// Loads Lua-scripted settings into typed host sections
pub struct SettingsManager {
    config_root: PathBuf,
    main_file: String,
    registry: SectionRegistry,
    registrations: Registrations,
    instances: HashMap<String, Box<dyn Any>>,
    snapshot: Snapshot,
}

impl SettingsManager {
    /// Create a manager over a configuration root directory
    ///
    /// The directory is checked at load time, not here.
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self::with_main_file(config_root, DEFAULT_MAIN_FILE)
    }

    /// Create a manager with a non-default main script name
    pub fn with_main_file(config_root: impl Into<PathBuf>, main_file: impl Into<String>) -> Self {
        Self {
            config_root: config_root.into(),
            main_file: main_file.into(),
            registry: SectionRegistry::new(),
            registrations: Registrations::default(),
            instances: HashMap::new(),
            snapshot: Snapshot::default(),
        }
    }

    /// Register a host type as the section bound under `key`
    ///
    /// Must be called before loading. Registering two types under one key
    /// is an error.
    pub fn register_section<T: Section>(&mut self, key: impl Into<String>) -> Result<()> {
        self.registry.register::<T>(key)
    }

    /// Register a named group of host functions, callable from scripts as
    /// `name.function(...)`
    ///
    /// Applies from the next load onward. A package named like a built-in
    /// (`os`, `log`) shadows it.
    pub fn add_method_package(&mut self, package: MethodPackage) {
        self.registrations.packages.push(package);
    }

    /// Install a function onto an existing global table, callable through
    /// method syntax (e.g. target `string`, name `trim`: `s:trim()`)
    pub fn add_extension<F>(&mut self, target: impl Into<String>, name: impl Into<String>, f: F)
    where
        F: Fn(&Lua, LuaMultiValue) -> LuaResult<LuaMultiValue> + 'static,
    {
        self.registrations.extensions.push(Extension {
            target: target.into(),
            name: name.into(),
            function: Rc::new(f),
        });
    }

    /// Register a single host function as a plain global
    pub fn add_function<F>(&mut self, key: impl Into<String>, f: F)
    where
        F: Fn(&Lua, LuaMultiValue) -> LuaResult<LuaMultiValue> + 'static,
    {
        self.registrations.delegates.push((key.into(), Rc::new(f)));
    }

    /// Register a table bound as a global when the environment is built
    pub fn add_table(&mut self, key: impl Into<String>, table: Value) {
        self.registrations.tables.push((key.into(), table));
    }

    /// Register a plain global value
    pub fn add_global(&mut self, key: impl Into<String>, value: Value) {
        self.registrations.globals.push((key.into(), value));
    }

    /// Drop all user method packages; the next load runs without them
    pub fn clear_user_packages(&mut self) {
        self.registrations.packages.clear();
    }

    /// Drop all user extensions; the next load runs without them
    pub fn clear_user_extensions(&mut self) {
        self.registrations.extensions.clear();
    }

    /// Load the main settings script with default options
    pub fn load_settings(&mut self) -> Result<()> {
        self.load_settings_with(LoadOptions::default())
    }

    /// Load the main settings script
    ///
    /// Faults are logged and re-raised, never downgraded to a silent
    /// "not loaded" state. The outcome is logged on every exit path.
    pub fn load_settings_with(&mut self, options: LoadOptions) -> Result<()> {
        let result = self.load_inner(&options);
        match &result {
            Ok(()) => tracing::info!("settings loaded successfully"),
            Err(e) => tracing::error!("problem occurred when loading settings: {e}"),
        }
        result
    }

    fn load_inner(&mut self, options: &LoadOptions) -> Result<()> {
        if !self.config_root.is_dir() {
            return Err(Error::ConfigurationNotFound(format!(
                "configuration directory {} was not found",
                self.config_root.display()
            )));
        }
        let main_path = self.config_root.join(&self.main_file);
        if !main_path.is_file() {
            return Err(Error::ConfigurationNotFound(format!(
                "main settings file {} was not found",
                main_path.display()
            )));
        }

        // Fresh environment per load; seeding installs the placeholder
        // instances
        let builder =
            EnvironmentBuilder::new(&self.registry, &self.registrations, &self.config_root);
        let (env, placeholders) = builder.build()?;
        self.instances = placeholders;

        let tracer = ExecutionTracer::new();
        let loader = ScriptLoader::new(&self.config_root, &tracer);
        loader.run(&env, &self.main_file, options)?;

        materialize_sections(&self.registry, &env, &mut self.instances)?;
        self.snapshot = Snapshot::capture(&env)?;

        // `env` drops here; nothing created inside it survives this call
        Ok(())
    }

    /// Get the typed section registered under `key`
    ///
    /// Fails with `SectionNotFound` for unknown keys and `SectionType` when
    /// the key exists under a different type.
    pub fn get_section<T: 'static>(&self, key: &str) -> Result<&T> {
        let instance = self
            .instances
            .get(key)
            .ok_or_else(|| Error::SectionNotFound(key.to_string()))?;
        instance.downcast_ref::<T>().ok_or_else(|| Error::SectionType {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Non-throwing section lookup
    pub fn try_get_section<T: 'static>(&self, key: &str) -> Option<&T> {
        self.instances.get(key)?.downcast_ref::<T>()
    }

    /// Look up a script-defined global with no registered type, as a
    /// generic table value
    pub fn get_raw_table(&self, key: &str) -> Option<&Value> {
        self.snapshot.raw_table(key)
    }

    /// Look up a script-defined global with no registered type, as JSON
    pub fn get_raw_json(&self, key: &str) -> Option<&serde_json::Value> {
        self.snapshot.raw_json(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    struct UiSettings {
        width: f64,
        height: f64,
        scale: f64,
    }

    fn write_config(dir: &std::path::Path, main: &str) {
        std::fs::write(dir.join(DEFAULT_MAIN_FILE), main).unwrap();
    }

    #[test]
    fn test_missing_root_is_configuration_not_found() {
        let mut manager = SettingsManager::new("/definitely/not/a/real/path");
        let err = manager.load_settings().unwrap_err();
        assert!(matches!(err, Error::ConfigurationNotFound(_)));
    }

    #[test]
    fn test_missing_main_file_is_configuration_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SettingsManager::new(dir.path());
        let err = manager.load_settings().unwrap_err();
        assert!(matches!(err, Error::ConfigurationNotFound(_)));
    }

    #[test]
    fn test_empty_script_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "-- nothing defined\n");

        let mut manager = SettingsManager::new(dir.path());
        manager.register_section::<UiSettings>("UiSettings").unwrap();
        manager.load_settings().unwrap();

        let ui: &UiSettings = manager.get_section("UiSettings").unwrap();
        assert_eq!(*ui, UiSettings::default());
    }

    #[test]
    fn test_section_lookup_faults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "x = 1\n");

        let mut manager = SettingsManager::new(dir.path());
        manager.load_settings().unwrap();

        let err = manager.get_section::<UiSettings>("Unregistered").unwrap_err();
        assert!(matches!(err, Error::SectionNotFound(_)));
        assert!(manager.try_get_section::<UiSettings>("Unregistered").is_none());
    }

    #[test]
    fn test_syntax_fault_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "width = 100\nheight = = 200\n");

        let mut manager = SettingsManager::new(dir.path());
        manager.register_section::<UiSettings>("UiSettings").unwrap();
        let err = manager.load_settings().unwrap_err();
        match err {
            Error::ScriptSyntax { line, excerpt, .. } => {
                assert_eq!(line, 2);
                assert_eq!(excerpt.as_deref(), Some("height = = 200"));
            }
            other => panic!("expected ScriptSyntax, got {other:?}"),
        }
        // No section materialized on a failed load
        assert!(manager.get_raw_table("width").is_none());
    }

    #[test]
    fn test_runtime_fault_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "UiSettings.width = 10\nerror(\"boom\")\n");

        let mut manager = SettingsManager::new(dir.path());
        manager.register_section::<UiSettings>("UiSettings").unwrap();
        let err = manager.load_settings().unwrap_err();
        assert!(matches!(err, Error::ScriptRuntime { .. }));
    }

    #[test]
    fn test_registered_function_visible_to_script() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "UiSettings.scale = half(4)\n");

        let mut manager = SettingsManager::new(dir.path());
        manager.register_section::<UiSettings>("UiSettings").unwrap();
        manager.add_function("half", |lua, args: LuaMultiValue| {
            let n: f64 = f64::from_lua_multi(args, lua)?;
            (n / 2.0).into_lua_multi(lua)
        });
        manager.load_settings().unwrap();

        let ui: &UiSettings = manager.get_section("UiSettings").unwrap();
        assert_eq!(ui.scale, 2.0);
    }
}
