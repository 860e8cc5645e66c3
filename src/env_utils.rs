// Copyright 2024-2025 Irreducible Inc.

use std::{env, fmt::Display, str::FromStr};

/// Reads `name` through `parse`. Unset variables give `default`, unparsable ones log a
/// warning and give `default` too.
fn parse_env_var<T: Display>(name: &str, default: T, parse: impl FnOnce(&str) -> Option<T>) -> T {
    let Ok(val) = env::var(name) else {
        return default;
    };
    parse(val.trim()).unwrap_or_else(|| {
        tracing::warn!(
            "invalid '{name}' environment value: {val}, using the default value '{default}'"
        );
        default
    })
}

pub fn get_env_var<T: FromStr + Display>(name: &str, default: T) -> T {
    parse_env_var(name, default, |val| val.parse().ok())
}

pub fn get_bool_env_var(name: &str, default: bool) -> bool {
    parse_env_var(name, default, |val| match val.to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    })
}
