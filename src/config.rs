//! Configuration loading and defaults.
//!
//! Resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TERMSUP_API_KEY`, `TERMSUP_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `termsup.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:7337"
//! max_sessions = 20
//! max_connections = 64
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [logging]
//! level = "info"
//!
//! [directives]
//! dedupe_window_ms = 300000
//! carry_cap_bytes = 65536
//!
//! # supervisor-wide cwd fallback used when a session doesn't specify one
//! # (and the process cwd is also unavailable); optional.
//! supervisor_cwd = "/work"
//!
//! # one [shell.<VARIANT>] table per supported tool variant
//! [shell.A]
//! command = "tool-a"
//! args = ["--print-mode"]
//!
//! [shell.B]
//! command = "tool-b"
//! args = []
//!
//! [shell.C]
//! command = "tool-c"
//! args = []
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::variant::{ToolSpec, ToolsTable, Variant};

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub directives: DirectivesConfig,
    /// Supervisor-wide cwd fallback used when a session doesn't specify one.
    pub supervisor_cwd: Option<String>,
    /// Per-variant command table keyed `A`/`B`/`C` in TOML.
    #[serde(default, rename = "shell")]
    pub shell: HashMap<String, ToolSpec>,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:7337`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions the registry will host (default 20).
    /// Advisory at the HTTP boundary — the core registry itself has no cap.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Maximum concurrent TCP connections (default 64).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Authentication settings for the ambient HTTP/WS surface. The core itself
/// has no authentication concept.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `TERMSUP_API_KEY` env var.
    /// Defaults to `"change-me"`, which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Directive Parser hardening knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectivesConfig {
    /// Dedupe window in milliseconds.
    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,
    /// Cap on a session's carry buffer before it is dropped.
    #[serde(default = "default_carry_cap_bytes")]
    pub carry_cap_bytes: usize,
}

fn default_listen() -> String {
    "0.0.0.0:7337".to_string()
}
fn default_max_sessions() -> usize {
    20
}
fn default_max_connections() -> usize {
    64
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_dedupe_window_ms() -> u64 {
    300_000
}
fn default_carry_cap_bytes() -> usize {
    65536
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for DirectivesConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: default_dedupe_window_ms(),
            carry_cap_bytes: default_carry_cap_bytes(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `termsup.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("termsup.toml").exists() {
            let content =
                std::fs::read_to_string("termsup.toml").expect("Failed to read termsup.toml");
            toml::from_str(&content).expect("Failed to parse termsup.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                auth: AuthConfig::default(),
                logging: LoggingConfig::default(),
                directives: DirectivesConfig::default(),
                supervisor_cwd: None,
                shell: HashMap::new(),
            }
        };

        if let Ok(key) = std::env::var("TERMSUP_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("TERMSUP_LISTEN") {
            config.server.listen = listen;
        }

        config
    }

    /// Validate the loaded config, returning a list of human-readable errors.
    /// An empty list means the config is ready to serve.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for variant in [Variant::A, Variant::B, Variant::C] {
            if !self.shell.contains_key(variant.as_str()) {
                errors.push(format!(
                    "missing [shell.{}] table: no command configured for variant {}",
                    variant.as_str(),
                    variant.as_str()
                ));
            }
        }
        errors
    }

    /// Build the `variant → {command, args}` table the registry needs
    /// from the `[shell.*]` tables.
    pub fn tools_table(&self) -> ToolsTable {
        let mut table = ToolsTable::new();
        for variant in [Variant::A, Variant::B, Variant::C] {
            if let Some(spec) = self.shell.get(variant.as_str()) {
                table.insert(variant, spec.clone());
            }
        }
        table
    }

    pub fn dedupe_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.directives.dedupe_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_flags_missing_variants() {
        let config = Config {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            directives: DirectivesConfig::default(),
            supervisor_cwd: None,
            shell: HashMap::new(),
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn validate_passes_with_all_three_variants() {
        let mut shell = HashMap::new();
        for v in ["A", "B", "C"] {
            shell.insert(
                v.to_string(),
                ToolSpec {
                    command: "true".to_string(),
                    args: vec![],
                },
            );
        }
        let config = Config {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            directives: DirectivesConfig::default(),
            supervisor_cwd: None,
            shell,
        };
        assert!(config.validate().is_empty());
        assert_eq!(config.tools_table().len(), 3);
    }
}
