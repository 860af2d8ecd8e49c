//! Error types for the settings system

use crate::tracer::TraceLocation;
use thiserror::Error;

/// Result type for settings operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or querying settings
#[derive(Error, Debug)]
pub enum Error {
    /// Missing configuration root directory or main settings file
    #[error("configuration not found: {0}")]
    ConfigurationNotFound(String),

    /// The main or a child script failed to parse
    #[error("syntax error in {file} at line {line}: {message}")]
    ScriptSyntax {
        file: String,
        line: u32,
        /// Lua 5.4 does not report columns; present only when known
        column: Option<u32>,
        message: String,
        /// Best-effort re-read of the offending source line
        excerpt: Option<String>,
    },

    /// A script faulted during execution, enriched with the tracer's
    /// last recorded frame and trace locations
    #[error("runtime error: {message} (last frame {last_frame}, last trace {last_trace})")]
    ScriptRuntime {
        message: String,
        last_frame: TraceLocation,
        last_trace: TraceLocation,
    },

    /// A recursively loaded child script faulted
    #[error("error in child script {file} (line {line}): {source}")]
    ChildLink {
        file: String,
        line: u32,
        #[source]
        source: Box<Error>,
    },

    /// No section registered under this key
    #[error("settings section not found: {0}")]
    SectionNotFound(String),

    /// Two section types registered under one key
    #[error("duplicate section key: {0}")]
    DuplicateSectionKey(String),

    /// A section exists under this key but with a different type
    #[error("section {key} is not of type {expected}")]
    SectionType { key: String, expected: &'static str },

    /// Lua error
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// JSON conversion error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
