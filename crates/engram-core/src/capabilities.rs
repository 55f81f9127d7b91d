//! Capability gate
//!
//! Runtime feature flags governing optional surface area. Flags are resolved
//! from the environment at request time, never cached at startup, so they can
//! toggle without a restart. All flags are additive: disabling one narrows
//! behavior but never changes the wire shape of existing fields.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sentinel scope discriminator used in the idempotency ledger for
/// globally-scoped (unscoped) writes.
pub const GLOBAL_SCOPE_KEY: &str = "__global__";

/// Resolved feature flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub scopes: bool,
    pub idempotency: bool,
    pub context_hydration: bool,
    pub work_items: bool,
}

impl FeatureFlags {
    /// Read the current flag state from the environment
    pub fn from_env() -> Self {
        Self {
            scopes: env_flag("ENGRAM_ENABLE_SCOPES", true),
            idempotency: env_flag("ENGRAM_ENABLE_IDEMPOTENCY", true),
            context_hydration: env_flag("ENGRAM_ENABLE_CONTEXT_HYDRATION", true),
            work_items: env_flag("ENGRAM_ENABLE_WORK_ITEMS", false),
        }
    }

    /// All flags on (test convenience)
    pub fn all_enabled() -> Self {
        Self {
            scopes: true,
            idempotency: true,
            context_hydration: true,
            work_items: true,
        }
    }

    /// All flags off (legacy-compatible behavior)
    pub fn all_disabled() -> Self {
        Self {
            scopes: false,
            idempotency: false,
            context_hydration: false,
            work_items: false,
        }
    }

    /// Ledger scope discriminator for a write: the scope id when scopes are
    /// enabled and one was given, else the global sentinel.
    pub fn scope_key<'a>(&self, scope_id: Option<&'a str>) -> &'a str {
        if self.scopes {
            scope_id.unwrap_or(GLOBAL_SCOPE_KEY)
        } else {
            GLOBAL_SCOPE_KEY
        }
    }
}

/// Capability document returned by the `capabilities` tool and HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub scopes: bool,
    pub idempotency: bool,
    pub context_hydration: bool,
    pub work_items: bool,
    pub version: String,
    pub tools: Vec<String>,
}

impl Capabilities {
    pub fn new(flags: FeatureFlags) -> Self {
        let mut tools = vec![
            "remember".to_string(),
            "recall".to_string(),
            "forget".to_string(),
            "capabilities".to_string(),
        ];
        if flags.context_hydration {
            tools.push("context_hydrate".to_string());
        }

        Self {
            scopes: flags.scopes,
            idempotency: flags.idempotency,
            context_hydration: flags.context_hydration,
            work_items: flags.work_items,
            version: env!("CARGO_PKG_VERSION").to_string(),
            tools,
        }
    }
}

/// Parse a boolean flag env var: "1"/"true" enable, "0"/"false" disable,
/// anything else warns and falls back to the default.
fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" => true,
            "0" | "false" => false,
            "" => default,
            other => {
                warn!("Invalid value '{}' for {}, using default {}", other, name, default);
                default
            }
        },
        Err(_) => default,
    }
}

// ============================================================================
// TESTS
// ============================================================================
