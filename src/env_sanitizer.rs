//! Builds the child environment for a session.
//!
//! Pure functions only — no I/O, no fallible paths. Each `scrub_*` takes the
//! parent environment and the caller's per-profile overrides and returns the
//! finished child environment; `Variant::strategy().scrub_env(...)` is the
//! entry point callers should use (see [`crate::variant`]).

use std::collections::HashMap;

/// Terminal type forced on every child regardless of variant.
const FORCED_TERM: &str = "xterm-256color";

/// Variant `A` strips anything that would pin the child to a pre-existing
/// conversation/session id, or mark it as running under CI.
const VARIANT_A_STRIP: [&str; 3] = ["CLAUDE_SESSION_ID", "CLAUDE_CODE_SSE_PORT", "CI"];

/// Variant `B` strips credential/model/billing variables unless the caller
/// opts into `AuthMode::Api`.
const VARIANT_B_STRIP: [&str; 8] = [
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_AUTH_TOKEN",
    "ANTHROPIC_BASE_URL",
    "ANTHROPIC_MODEL",
    "ANTHROPIC_SUBAGENT_MODEL",
    "CLAUDE_CODE_USE_BEDROCK",
    "CLAUDE_CODE_SKIP_BEDROCK_AUTH",
    "AWS_BEARER_TOKEN_BEDROCK",
];

/// Variant `B`'s optional auth mode. `Api` opts out of the credential strip
/// so an explicit API-key caller can actually use one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Subscription,
    Api,
}

fn merge(parent: &HashMap<String, String>, overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = parent.clone();
    for (k, v) in overrides {
        env.insert(k.clone(), v.clone());
    }
    env
}

fn force_term(env: &mut HashMap<String, String>) {
    env.insert("TERM".to_string(), FORCED_TERM.to_string());
}

/// Variant `A`: strip on a copy of the parent env, then apply overrides
/// (which win even if they reintroduce a stripped key).
pub fn scrub_variant_a(
    parent: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut base = parent.clone();
    for key in VARIANT_A_STRIP {
        base.remove(key);
    }
    let mut env = merge(&base, overrides);
    force_term(&mut env);
    env
}

/// Variant `B`: strip twice — once on the inherited base, once after
/// merging overrides — unless `auth_mode` is `Api`, so a subscription-mode
/// caller's overrides can't resurrect a credential the strip removed.
pub fn scrub_variant_b(
    parent: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
    auth_mode: AuthMode,
) -> HashMap<String, String> {
    let mut env = if auth_mode == AuthMode::Api {
        merge(parent, overrides)
    } else {
        let mut base = parent.clone();
        for key in VARIANT_B_STRIP {
            base.remove(key);
        }
        let mut merged = merge(&base, overrides);
        for key in VARIANT_B_STRIP {
            merged.remove(key);
        }
        merged
    };
    force_term(&mut env);
    env
}

/// Variant `C`: no variant-specific stripping, just the forced terminal
/// type and override merge.
pub fn scrub_passthrough(
    parent: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = merge(parent, overrides);
    force_term(&mut env);
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn variant_a_strips_session_pinning_vars() {
        let parent = env(&[("CLAUDE_SESSION_ID", "abc"), ("PATH", "/bin")]);
        let out = scrub_variant_a(&parent, &HashMap::new());
        assert!(!out.contains_key("CLAUDE_SESSION_ID"));
        assert_eq!(out.get("PATH").map(String::as_str), Some("/bin"));
        assert_eq!(out.get("TERM").map(String::as_str), Some(FORCED_TERM));
    }

    #[test]
    fn variant_a_overrides_win_after_strip() {
        let parent = env(&[("CI", "true")]);
        let overrides = env(&[("CI", "true")]);
        let out = scrub_variant_a(&parent, &overrides);
        assert_eq!(out.get("CI").map(String::as_str), Some("true"));
    }

    #[test]
    fn variant_b_strips_credentials_by_default() {
        let parent = env(&[("ANTHROPIC_API_KEY", "sk-secret"), ("PATH", "/bin")]);
        let out = scrub_variant_b(&parent, &HashMap::new(), AuthMode::Subscription);
        assert!(!out.contains_key("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn variant_b_api_mode_keeps_credentials() {
        let parent = env(&[("ANTHROPIC_API_KEY", "sk-secret")]);
        let out = scrub_variant_b(&parent, &HashMap::new(), AuthMode::Api);
        assert_eq!(out.get("ANTHROPIC_API_KEY").map(String::as_str), Some("sk-secret"));
    }

    #[test]
    fn variant_b_override_cannot_resurrect_stripped_key() {
        let parent = env(&[("ANTHROPIC_API_KEY", "sk-parent")]);
        let overrides = env(&[("ANTHROPIC_API_KEY", "sk-override")]);
        let out = scrub_variant_b(&parent, &overrides, AuthMode::Subscription);
        assert!(!out.contains_key("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn every_variant_forces_term() {
        let parent = HashMap::new();
        assert_eq!(
            scrub_variant_a(&parent, &HashMap::new()).get("TERM").map(String::as_str),
            Some(FORCED_TERM)
        );
        assert_eq!(
            scrub_variant_b(&parent, &HashMap::new(), AuthMode::Subscription)
                .get("TERM")
                .map(String::as_str),
            Some(FORCED_TERM)
        );
        assert_eq!(
            scrub_passthrough(&parent, &HashMap::new()).get("TERM").map(String::as_str),
            Some(FORCED_TERM)
        );
    }
}
