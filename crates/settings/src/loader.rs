//! Script compilation and execution
//!
//! Compiles the main settings script against a freshly built environment
//! and runs it with the tracer attached. When child-link loading is
//! enabled, tables bound after the base set are walked depth-first for
//! string values ending in `.lua`; each existing file is compiled and run
//! against the same environment, so child scripts observe and may mutate
//! globals the main script already defined. Table identity is tracked to
//! keep cyclic table graphs from recursing forever.

use crate::environment::Environment;
use crate::tracer::ExecutionTracer;
use crate::{Error, Result};
use mlua::prelude::*;
use std::collections::HashSet;
use std::path::Path;

/// File suffix that marks a table value as a link to another script
pub const SCRIPT_SUFFIX: &str = ".lua";

/// Controls for one load call
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Follow script links found in table values after the main script ran
    pub load_child_links: bool,
    /// When set, only tables bound under these global keys are searched
    /// for links
    pub allowed_link_keys: Option<HashSet<String>>,
}

pub(crate) struct ScriptLoader<'a> {
    config_root: &'a Path,
    tracer: &'a ExecutionTracer,
}

impl<'a> ScriptLoader<'a> {
    pub fn new(config_root: &'a Path, tracer: &'a ExecutionTracer) -> Self {
        Self {
            config_root,
            tracer,
        }
    }

    /// Compile and execute the main script, then follow links if enabled
    pub fn run(&self, env: &Environment, main_file: &str, options: &LoadOptions) -> Result<()> {
        let result = self.run_inner(env, main_file, options);
        self.tracer.detach(env.lua());
        result
    }

    fn run_inner(&self, env: &Environment, main_file: &str, options: &LoadOptions) -> Result<()> {
        let main_path = self.config_root.join(main_file);

        self.tracer.attach(env.lua())?;
        let chunk = self.compile(env.lua(), &main_path, main_file)?;

        tracing::debug!("executing main settings script {main_file}");
        if let Err(cause) = chunk.call::<()>(()) {
            let fault = self.tracer.enrich(&cause);
            tracing::error!("main settings script failed: {fault}");
            return Err(fault);
        }

        if options.load_child_links {
            self.run_child_links(env, options)?;
        }

        Ok(())
    }

    /// Compile one chunk, mapping parse failures to a syntax fault with a
    /// best-effort source excerpt
    fn compile(&self, lua: &Lua, path: &Path, name: &str) -> Result<LuaFunction> {
        let source = std::fs::read_to_string(path)?;
        // The '@' prefix makes Lua treat the chunk name as a file name in
        // error messages and debug info
        match lua.load(&source).set_name(format!("@{name}")).into_function() {
            Ok(function) => Ok(function),
            Err(LuaError::SyntaxError { message, .. }) => {
                let line = parse_fault_line(&message, name).unwrap_or(0);
                let excerpt = read_source_line(path, line);
                let fault = Error::ScriptSyntax {
                    file: name.to_string(),
                    line,
                    column: None,
                    message,
                    excerpt,
                };
                tracing::error!("failed to parse {name}: {fault}");
                Err(fault)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn run_child_links(&self, env: &Environment, options: &LoadOptions) -> Result<()> {
        let mut visited = HashSet::new();
        for (key, value) in env.added_globals()? {
            let LuaValue::Table(table) = value else {
                continue;
            };
            if let Some(allowed) = &options.allowed_link_keys {
                if !allowed.contains(&key) {
                    continue;
                }
            }
            self.walk_table(env, &table, &mut visited)?;
        }
        Ok(())
    }

    /// Run links found directly in this table, then recurse into nested
    /// tables depth-first
    fn walk_table(
        &self,
        env: &Environment,
        table: &LuaTable,
        visited: &mut HashSet<usize>,
    ) -> Result<()> {
        if !visited.insert(table.to_pointer() as usize) {
            return Ok(());
        }

        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (_, value) = pair?;
            if let LuaValue::String(s) = value {
                let name = s.to_str()?.to_string();
                if !name.ends_with(SCRIPT_SUFFIX) {
                    continue;
                }
                let path = self.config_root.join(&name);
                if path.is_file() {
                    self.run_child(env, &path, &name)?;
                }
            }
        }

        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (_, value) = pair?;
            if let LuaValue::Table(nested) = value {
                self.walk_table(env, &nested, visited)?;
            }
        }

        Ok(())
    }

    fn run_child(&self, env: &Environment, path: &Path, name: &str) -> Result<()> {
        tracing::debug!("executing linked child script {name}");
        self.tracer.attach(env.lua())?;
        let chunk = self.compile(env.lua(), path, name)?;
        if let Err(cause) = chunk.call::<()>(()) {
            let fault = self.tracer.enrich(&cause);
            let line = match &fault {
                Error::ScriptRuntime { last_frame, .. } => last_frame.line,
                _ => 0,
            };
            tracing::error!("child script {name} failed at line {line}: {fault}");
            return Err(Error::ChildLink {
                file: name.to_string(),
                line,
                source: Box::new(fault),
            });
        }
        Ok(())
    }
}

/// Pull the line number out of a Lua error message like `file.lua:3: ...`
fn parse_fault_line(message: &str, name: &str) -> Option<u32> {
    let tail = message
        .find(name)
        .map(|idx| &message[idx + name.len()..])?
        .strip_prefix(':')?;
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Best-effort re-read of the offending line for syntax faults
fn read_source_line(path: &Path, line: u32) -> Option<String> {
    if line == 0 {
        return None;
    }
    let source = std::fs::read_to_string(path).ok()?;
    source.lines().nth(line as usize - 1).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fault_line() {
        let message = "MainSettings.lua:7: '=' expected near 'Height'";
        assert_eq!(parse_fault_line(message, "MainSettings.lua"), Some(7));
        assert_eq!(parse_fault_line("no location here", "MainSettings.lua"), None);
    }

    #[test]
    fn test_read_source_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lua");
        std::fs::write(&path, "a = 1\nb = !!\nc = 3\n").unwrap();
        assert_eq!(read_source_line(&path, 2).as_deref(), Some("b = !!"));
        assert_eq!(read_source_line(&path, 99), None);
    }
}
