//! Sandbox-safe identifier aliasing for tool server names.

use std::collections::HashSet;

/// Sanitise `name` into a valid identifier: lowercase, collapse any run of
/// non-`[a-z0-9_]` characters into a single `_`, and prefix with `_` if the
/// result would start with a digit.
pub fn sanitize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_was_sep = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
            prev_was_sep = false;
        } else if !prev_was_sep {
            out.push('_');
            prev_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    let mut result = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };
    if result.starts_with(|c: char| c.is_ascii_digit()) {
        result.insert(0, '_');
    }
    result
}

/// Assign a unique alias for `name` against the set of aliases already taken,
/// appending `_2`, `_3`, ... on collision.
pub fn unique_alias(name: &str, taken: &HashSet<String>) -> String {
    let base = sanitize(name);
    if !taken.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases() {
        assert_eq!(sanitize("Weather"), "weather");
    }

    #[test]
    fn sanitize_collapses_separators() {
        assert_eq!(sanitize("my--cool..server"), "my_cool_server");
    }

    #[test]
    fn sanitize_prefixes_leading_digit() {
        assert_eq!(sanitize("7eleven"), "_7eleven");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize("My Weird/Server!!Name");
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unique_alias_appends_suffix_on_collision() {
        let mut taken = HashSet::new();
        taken.insert("weather".to_string());
        assert_eq!(unique_alias("weather", &taken), "weather_2");
        taken.insert("weather_2".to_string());
        assert_eq!(unique_alias("weather", &taken), "weather_3");
    }

    #[test]
    fn unique_alias_no_collision_returns_base() {
        let taken = HashSet::new();
        assert_eq!(unique_alias("weather", &taken), "weather");
    }
}
