//! Retrieval pipeline
//!
//! `recall` tries three paths in strict order: recent-mode for empty
//! queries, semantic ranking over embedded candidates, and FTS as the final
//! fallthrough. Effective strength is computed on read; the only writes a
//! recall performs are the access updates for memories actually returned.

use chrono::{DateTime, Utc};

use crate::decay::effective_strength;
use crate::memory::{Memory, RecallHit, RecallInput, RecallResult, ScopeFilter};
use crate::metrics::{MetricEvent, MetricKind};

use super::{Engram, Result};

/// A candidate with its computed scores, before filtering and ranking
struct Candidate {
    memory: Memory,
    effective: f64,
    relevance: f64,
}

impl Engram {
    /// Recall ranked memories for a natural-language query
    pub fn recall(&self, input: RecallInput) -> Result<RecallResult> {
        let filter = input.scope_filter();
        let now = Utc::now();

        let (hits, fallback_mode) = if input.query.trim().is_empty() {
            (self.recent_mode(&input, &filter, now)?, true)
        } else {
            match self.semantic_mode(&input, &filter, now)? {
                Some(hits) => (hits, false),
                None => (self.fts_mode(&input, &filter, now)?, false),
            }
        };

        // Access updates only for returned memories; each is independent
        for hit in &hits {
            self.storage()
                .update_access(&hit.id, self.config().access_boost_strength)?;
        }

        self.storage().log_metric(
            &MetricEvent::new(MetricKind::Recall)
                .session(input.session_id.as_deref())
                .query(&input.query)
                .results(hits.len() as i64, fallback_mode),
        )?;

        Ok(RecallResult {
            results: hits,
            fallback_mode,
        })
    }

    /// Empty-query path: recent memories ranked by effective strength
    fn recent_mode(
        &self,
        input: &RecallInput,
        filter: &ScopeFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecallHit>> {
        let rows = self.storage().search_fts("", input.limit * 2, filter)?;

        let mut candidates: Vec<Candidate> = rows
            .into_iter()
            .map(|(memory, _)| {
                let effective = self.effective(&memory, now);
                Candidate {
                    memory,
                    effective,
                    relevance: effective,
                }
            })
            .collect();

        retain_matching(&mut candidates, input);
        // Strength first, then recency
        candidates.sort_by(|a, b| {
            b.effective
                .partial_cmp(&a.effective)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        candidates.truncate(input.limit);

        Ok(candidates.into_iter().map(to_hit).collect())
    }

    /// Semantic path: cosine similarity against all embedded candidates.
    /// Returns None when there are no embedded candidates or the query
    /// cannot be embedded, in which case the caller falls through to FTS.
    #[cfg(feature = "embeddings")]
    fn semantic_mode(
        &self,
        input: &RecallInput,
        filter: &ScopeFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<RecallHit>>> {
        let dimensions = self.embedding_dimensions();
        let candidates: Vec<Memory> = self
            .storage()
            .get_with_embeddings(filter)?
            .into_iter()
            // Vectors from a different model are unusable; those rows
            // participate via FTS only
            .filter(|m| {
                m.embedding
                    .as_ref()
                    .is_some_and(|v| v.len() == dimensions)
            })
            .collect();

        if candidates.is_empty() {
            return Ok(None);
        }

        let query_vector = match self.query_embedding(&input.query) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Query embedding failed, falling back to FTS: {}", e);
                return Ok(None);
            }
        };

        let mut scored: Vec<Candidate> = candidates
            .into_iter()
            .map(|memory| {
                let similarity = memory
                    .embedding
                    .as_ref()
                    .map(|v| crate::embeddings::cosine_similarity(&query_vector, v))
                    .unwrap_or(0.0);
                Candidate {
                    effective: self.effective(&memory, now),
                    relevance: similarity as f64,
                    memory,
                }
            })
            .collect();

        retain_matching(&mut scored, input);
        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(input.limit);

        Ok(Some(scored.into_iter().map(to_hit).collect()))
    }

    #[cfg(not(feature = "embeddings"))]
    fn semantic_mode(
        &self,
        _input: &RecallInput,
        _filter: &ScopeFilter,
        _now: DateTime<Utc>,
    ) -> Result<Option<Vec<RecallHit>>> {
        Ok(None)
    }

    /// FTS fallthrough: rank by bm25 (lower is better), map the non-positive
    /// rank into (0, 1] relevance via exp.
    fn fts_mode(
        &self,
        input: &RecallInput,
        filter: &ScopeFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<RecallHit>> {
        let rows = self
            .storage()
            .search_fts(&input.query, input.limit * 2, filter)?;

        let mut candidates: Vec<(Candidate, f64)> = rows
            .into_iter()
            .map(|(memory, rank)| {
                (
                    Candidate {
                        effective: self.effective(&memory, now),
                        relevance: rank.min(0.0).exp(),
                        memory,
                    },
                    rank,
                )
            })
            .collect();

        candidates.retain(|(c, _)| matches_filters(c, input));
        candidates.sort_by(|(a, rank_a), (b, rank_b)| {
            rank_a
                .partial_cmp(rank_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        candidates.truncate(input.limit);

        Ok(candidates.into_iter().map(|(c, _)| to_hit(c)).collect())
    }

    fn effective(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        effective_strength(
            memory.strength,
            memory.last_accessed,
            memory.access_count,
            now,
            self.config().decay_rate,
        )
    }
}

fn matches_filters(candidate: &Candidate, input: &RecallInput) -> bool {
    if candidate.effective < input.min_strength {
        return false;
    }
    match &input.category {
        Some(category) => candidate.memory.category.as_deref() == Some(category.as_str()),
        None => true,
    }
}

fn retain_matching(candidates: &mut Vec<Candidate>, input: &RecallInput) {
    candidates.retain(|c| matches_filters(c, input));
}

fn to_hit(candidate: Candidate) -> RecallHit {
    RecallHit {
        id: candidate.memory.id,
        content: candidate.memory.content,
        category: candidate.memory.category,
        strength: candidate.effective,
        relevance: candidate.relevance,
        created_at: candidate.memory.created_at,
        access_count: candidate.memory.access_count,
    }
}

// ============================================================================
// TESTS
// ============================================================================
