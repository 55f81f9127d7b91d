//! Configuration
//!
//! All settings come from `ENGRAM_*` environment variables with sensible
//! defaults. Invalid numeric values fall back to defaults with a warning
//! rather than aborting startup.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::warn;

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 7749;

/// Default per-day decay multiplier
pub const DEFAULT_DECAY_RATE: f64 = 0.95;

/// Default strength written back on recall hit
pub const DEFAULT_ACCESS_BOOST_STRENGTH: f64 = 1.0;

/// Default embedding model identifier
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-small-en-v1.5";

/// Runtime configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path (`ENGRAM_DB_PATH`)
    pub db_path: PathBuf,
    /// HTTP bind host (`ENGRAM_HTTP_HOST`)
    pub http_host: String,
    /// HTTP listen port (`ENGRAM_HTTP_PORT`)
    pub http_port: u16,
    /// Embedding model identifier (`ENGRAM_EMBEDDING_MODEL`)
    pub embedding_model: String,
    /// Per-day decay multiplier (`ENGRAM_DECAY_RATE`)
    pub decay_rate: f64,
    /// Strength set on recall hit (`ENGRAM_ACCESS_BOOST_STRENGTH`)
    pub access_boost_strength: f64,
    /// Data directory holding the database, model cache, PID and log files
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve configuration from environment variables
    pub fn from_env() -> Self {
        let data_dir = data_dir();

        let db_path = match std::env::var("ENGRAM_DB_PATH") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => data_dir.join("engram.db"),
        };

        let http_host = std::env::var("ENGRAM_HTTP_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let embedding_model = std::env::var("ENGRAM_EMBEDDING_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        Self {
            db_path,
            http_host,
            http_port: env_port("ENGRAM_HTTP_PORT", DEFAULT_HTTP_PORT),
            embedding_model,
            decay_rate: env_f64("ENGRAM_DECAY_RATE", DEFAULT_DECAY_RATE),
            access_boost_strength: env_f64(
                "ENGRAM_ACCESS_BOOST_STRENGTH",
                DEFAULT_ACCESS_BOOST_STRENGTH,
            ),
            data_dir,
        }
    }

    /// Path of the daemon PID file
    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join("engram.pid")
    }

    /// Path of the daemon log file
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("engram.log")
    }

    /// Path of the embedding-model cache directory
    pub fn model_cache_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Resolve the data directory, creating it if necessary.
///
/// Linux: `~/.local/share/engram`. Falls back to the current directory when
/// no home directory can be determined.
pub fn data_dir() -> PathBuf {
    let dir = ProjectDirs::from("dev", "engram", "engram")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".engram"));

    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!("Failed to create data directory {:?}: {}", dir, e);
    }

    // Restrict directory permissions to owner-only on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        let _ = std::fs::set_permissions(&dir, perms);
    }

    dir
}

/// Parse a float env var, warning and falling back on invalid input
fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid value '{}' for {}, using default {}", raw, name, default);
                default
            }
        },
        _ => default,
    }
}

/// Parse a port env var; u16 parsing enforces the 0-65535 range
fn env_port(name: &str, default: u16) -> u16 {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse::<u16>() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    "Invalid port '{}' for {} (must be 0-65535), using default {}",
                    raw, name, default
                );
                default
            }
        },
        _ => default,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_f64_invalid_falls_back() {
        // SAFETY: test-local env mutation, key is unique to this test
        unsafe { std::env::set_var("ENGRAM_TEST_F64_BAD", "not-a-number") };
        assert_eq!(env_f64("ENGRAM_TEST_F64_BAD", 0.95), 0.95);
        unsafe { std::env::remove_var("ENGRAM_TEST_F64_BAD") };
    }

    #[test]
    fn test_env_f64_valid() {
        unsafe { std::env::set_var("ENGRAM_TEST_F64_OK", "0.5") };
        assert_eq!(env_f64("ENGRAM_TEST_F64_OK", 0.95), 0.5);
        unsafe { std::env::remove_var("ENGRAM_TEST_F64_OK") };
    }

    #[test]
    fn test_env_port_out_of_range_falls_back() {
        unsafe { std::env::set_var("ENGRAM_TEST_PORT_BAD", "70000") };
        assert_eq!(env_port("ENGRAM_TEST_PORT_BAD", 7749), 7749);
        unsafe { std::env::remove_var("ENGRAM_TEST_PORT_BAD") };
    }

    #[test]
    fn test_env_port_unset_uses_default() {
        assert_eq!(env_port("ENGRAM_TEST_PORT_UNSET", 7749), 7749);
    }
}
