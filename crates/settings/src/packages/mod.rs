//! Built-in script-facing function packages
//!
//! These are registered into every environment before any user-supplied
//! packages, under fixed global names (`os`, `log`). User packages may
//! shadow them by registering under the same name.

pub(crate) mod log;
pub(crate) mod os;
