//! Environment variable parsing utilities.
//!
//! Configuration layers overlay `APK_EVASION_*` variables on top of their
//! defaults through these helpers instead of repeating
//! `std::env::var(..).ok().and_then(|v| v.parse().ok())` at each call site.
//!
//! # Example
//!
//! ```
//! use evasion_types::env_utils::{env_var, env_var_or};
//!
//! let budget: usize = env_var_or("APK_EVASION_QUERY_BUDGET", 100);
//! let seed: Option<u64> = env_var("APK_EVASION_SEED");
//! ```

use std::path::PathBuf;
use std::str::FromStr;

/// Parse an environment variable into a type that implements `FromStr`.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable with a default value.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// Truthiness of an environment variable, or `None` when it is unset.
///
/// "1", "true", "yes" and "on" (case-insensitive) are true; anything else is false.
pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// A non-empty environment variable as a path.
pub fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Parse a whitespace-separated environment variable into a vector.
///
/// Returns an empty vector if the variable is not set.
pub fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
