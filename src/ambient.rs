//! Ambient, process-wide defaults.

/// Default value of `submitWithTab` for new variant-`A` sessions, derived
/// from a single environment variable.
///
/// Absent or empty → `true`. One of `"0"|"false"|"no"` (case-insensitive,
/// trimmed) → `false`. Anything else → `true`.
pub fn default_submit_with_tab(var: Option<&str>) -> bool {
    match var.map(str::trim) {
        None => true,
        Some("") => true,
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"),
    }
}

/// Reads `TERMSUP_SUBMIT_TAB` from the process environment.
pub fn submit_with_tab_from_env() -> bool {
    default_submit_with_tab(std::env::var("TERMSUP_SUBMIT_TAB").ok().as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_defaults_true() {
        assert!(default_submit_with_tab(None));
    }

    #[test]
    fn empty_defaults_true() {
        assert!(default_submit_with_tab(Some("")));
    }

    #[test]
    fn falsey_values_disable() {
        for v in ["0", "false", "no", "FALSE", " No ", "NO"] {
            assert!(!default_submit_with_tab(Some(v)), "expected {v:?} to disable");
        }
    }

    #[test]
    fn anything_else_enables() {
        for v in ["1", "true", "yes", "on", "enabled"] {
            assert!(default_submit_with_tab(Some(v)), "expected {v:?} to enable");
        }
    }
}
