//! Runtime configuration for Tally.
//!
//! Configuration resolves in three layers: compiled defaults, an optional
//! TOML file (with `${VAR}` env substitution in string values), and
//! `TALLY_*` environment variable overrides on top.

pub mod env;
pub mod schema;

pub use env::{resolve_env_vars, MissingEnvVarError};
pub use schema::{CacheConfig, LoggingConfig, RateLimitConfig, TallyConfig};
