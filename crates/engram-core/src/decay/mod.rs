//! Time-decay relevance model
//!
//! Effective strength is a pure computation over the stored base strength,
//! the time since last access, and the access count:
//!
//! ```text
//! days_since   = (now - last_accessed) / 86400
//! decay_factor = decay_rate ^ days_since
//! access_boost = log(access_count + 1) / log(2)
//! effective    = clamp(base * decay_factor * access_boost, 0, 1)
//! ```
//!
//! Decay is computed on read and never written back as a side effect of
//! querying; only the explicit maintenance path persists decayed values.
//! Repeated recalls that do not return a memory must not compound-decay it.

use chrono::{DateTime, Utc};

/// Threshold below which a memory counts as freshly accessed (clock skew or
/// same-transaction reads).
const FRESH_ACCESS_DAYS: f64 = 0.001;

/// Compute the decay-adjusted, access-boosted strength at `now`.
pub fn effective_strength(
    base_strength: f64,
    last_accessed: DateTime<Utc>,
    access_count: i64,
    now: DateTime<Utc>,
    decay_rate: f64,
) -> f64 {
    let days_since = (now - last_accessed).num_milliseconds() as f64 / 86_400_000.0;

    if days_since < FRESH_ACCESS_DAYS {
        return base_strength.min(1.0);
    }

    let decay_factor = decay_rate.powf(days_since);
    let access_boost = ((access_count + 1) as f64).ln() / 2.0_f64.ln();

    (base_strength * decay_factor * access_boost).clamp(0.0, 1.0)
}

/// One row of a decay preview: stored base vs computed effective strength.
#[derive(Debug, Clone)]
pub struct DecayedStrength {
    pub id: String,
    pub base_strength: f64,
    pub effective_strength: f64,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
}

// ============================================================================
// TESTS
// ============================================================================
