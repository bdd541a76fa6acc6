//! # parley-settings
//!
//! Runtime configuration for the relay server.
//!
//! Settings are resolved in three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Environment variables**: `PARLEY_*` overrides
//! 3. **Command-line flags**: applied by the binary on top of the result
//!
//! There is no settings file; nothing the relay does is persisted.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides_from, load_settings};
pub use types::*;
