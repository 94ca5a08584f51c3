//! Environment variable substitution for config file values.
//!
//! Supports `${VAR_NAME}` syntax, resolved at load time. Only uppercase
//! `[A-Z_][A-Z0-9_]*` variable names are matched. `$${}` escapes to a
//! literal `${}`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Matches `${VAR}` references and their `$${VAR}` escaped form.
static SUBST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced in config")]
pub struct MissingEnvVarError {
    pub var_name: String,
}

/// Substitute `${VAR}` references in raw config text.
pub fn resolve_env_vars(raw: &str) -> Result<String, MissingEnvVarError> {
    resolve_env_vars_with(raw, &std::env::vars().collect())
}

/// Substitute env vars using a provided map (useful for testing).
pub fn resolve_env_vars_with(
    raw: &str,
    env: &HashMap<String, String>,
) -> Result<String, MissingEnvVarError> {
    let mut missing: Option<String> = None;

    let substituted = SUBST_PATTERN.replace_all(raw, |caps: &Captures| {
        let whole = caps.get(0).unwrap().as_str();
        if let Some(escaped) = whole.strip_prefix("$$") {
            // $${VAR} → literal ${VAR}
            return format!("${escaped}");
        }
        let name = &caps[1];
        match env.get(name) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(MissingEnvVarError { var_name }),
        None => Ok(substituted.into_owned()),
    }
}
