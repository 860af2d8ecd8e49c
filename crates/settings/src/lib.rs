//! Lua-scripted settings for host applications
//!
//! Configuration is executable script rather than static data. The host
//! registers typed sections, a fresh Lua environment is seeded with each
//! section's defaults, the main script (and optionally linked child
//! scripts) runs to compute or override values, and the final state is
//! materialized back into typed instances plus a generic snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use settings::SettingsManager;
//!
//! #[derive(Serialize, Deserialize, Default)]
//! struct RenderSettings {
//!     width: f64,
//!     height: f64,
//! }
//!
//! let mut manager = SettingsManager::new("config");
//! manager.register_section::<RenderSettings>("RenderSettings")?;
//! manager.load_settings()?;
//! let render: &RenderSettings = manager.get_section("RenderSettings")?;
//! ```

mod environment;
mod error;
mod loader;
mod manager;
mod materialize;
mod packages;
mod registry;
mod snapshot;
mod tracer;
mod value;

pub use environment::{HostFunction, MethodPackage};
pub use error::{Error, Result};
pub use loader::{LoadOptions, SCRIPT_SUFFIX};
pub use manager::{SettingsManager, DEFAULT_MAIN_FILE};
pub use registry::Section;
pub use tracer::TraceLocation;
pub use value::Value;

// Re-export mlua for downstream crates registering host functions
pub use mlua;
