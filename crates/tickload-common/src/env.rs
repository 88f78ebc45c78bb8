//! Environment variable helpers
//!
//! Every setting in tickload is read once at startup. These helpers keep the
//! "read, parse, fall back" dance in one place so configuration structs stay
//! declarative.

use std::str::FromStr;

/// Read a string variable, falling back to `default` when unset.
pub fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a string variable, treating unset and blank values as `None`.
pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or unparseable.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    parse_opt(key).unwrap_or(default)
}

/// Read and parse a variable, returning `None` when unset or unparseable.
pub fn parse_opt<T: FromStr>(key: &str) -> Option<T> {
    var_opt(key).and_then(|s| s.parse().ok())
}

/// Read a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`
/// in any case.
pub fn flag_or(key: &str, default: bool) -> bool {
    match var_opt(key).map(|v| v.to_lowercase()) {
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}
