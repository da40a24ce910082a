//! Tool variants and their per-variant strategy.
//!
//! A small set of variant strategy objects behind one interface rather
//! than an inheritance chain — [`VariantStrategy`] is that interface,
//! implemented once per variant and reached through [`Variant::strategy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::env_sanitizer::{self, AuthMode};

/// The three supported AI coding tool variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Variant {
    A,
    B,
    C,
}

impl Default for Variant {
    fn default() -> Self {
        Self::C
    }
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    /// Whether this variant uses the queued, TAB/CR/LF write serializer
    /// instead of a synchronous write pass-through.
    pub fn uses_write_queue(self) -> bool {
        matches!(self, Self::A)
    }

    pub fn strategy(self) -> &'static dyn VariantStrategy {
        match self {
            Self::A => &VariantAStrategy,
            Self::B => &VariantBStrategy,
            Self::C => &VariantCStrategy,
        }
    }
}

/// Per-variant behavior: environment scrubbing today, and the hook point
/// for any future per-variant submit-sequence tweak.
pub trait VariantStrategy: Send + Sync {
    /// Scrub tool-pinning / credential variables from the child environment.
    /// `overrides` have already been merged into `parent` by the caller;
    /// implementations that strip twice (variant `B`) re-strip after.
    fn scrub_env(
        &self,
        parent: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
        auth_mode: AuthMode,
    ) -> HashMap<String, String>;
}

struct VariantAStrategy;
impl VariantStrategy for VariantAStrategy {
    fn scrub_env(
        &self,
        parent: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
        _auth_mode: AuthMode,
    ) -> HashMap<String, String> {
        env_sanitizer::scrub_variant_a(parent, overrides)
    }
}

struct VariantBStrategy;
impl VariantStrategy for VariantBStrategy {
    fn scrub_env(
        &self,
        parent: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
        auth_mode: AuthMode,
    ) -> HashMap<String, String> {
        env_sanitizer::scrub_variant_b(parent, overrides, auth_mode)
    }
}

struct VariantCStrategy;
impl VariantStrategy for VariantCStrategy {
    fn scrub_env(
        &self,
        parent: &HashMap<String, String>,
        overrides: &HashMap<String, String>,
        _auth_mode: AuthMode,
    ) -> HashMap<String, String> {
        env_sanitizer::scrub_passthrough(parent, overrides)
    }
}

/// Command spec for a variant: binary path plus base arguments, as loaded
/// from the `[tools.*]` config table.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub type ToolsTable = HashMap<Variant, ToolSpec>;
