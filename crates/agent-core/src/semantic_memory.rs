//! Semantic Memory Fetch (C7).
//!
//! Given a session/tenant/query, fetches candidate memory items, optionally
//! reranks them by Maximal Marginal Relevance, reassembles chunked answers,
//! and returns the top-k merged result.

use crate::clients::{EmbeddingService, SemanticItem, VectorStore};
use crate::error::AgentCoreError;
use crate::metrics::MetricsSink;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_POOL_MULTIPLIER: usize = 3;
const DEFAULT_EMBEDDING_MODEL: &str = "default";
/// Fixed read-side overlap skip for chunk reassembly. The write side
/// (`query_recorder::chunk_text`) chunks with exactly this much overlap, so
/// skipping it back out on every chunk after the first reproduces the
/// original answer with no gap and no duplication.
pub(crate) const CHUNK_OVERLAP_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct MemoryItem {
    pub text: String,
    pub similarity_score: f32,
    pub was_chunked: bool,
    pub chunk_count: Option<u32>,
    pub payload: serde_json::Value,
}

pub struct SemanticMemoryFetch {
    embedding: Arc<dyn EmbeddingService>,
    vector_store: Arc<dyn VectorStore>,
    metrics: Arc<dyn MetricsSink>,
    pool_multiplier: usize,
    mmr_enabled: bool,
    mmr_lambda: f32,
}

impl SemanticMemoryFetch {
    pub fn new(embedding: Arc<dyn EmbeddingService>, vector_store: Arc<dyn VectorStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            embedding,
            vector_store,
            metrics,
            pool_multiplier: DEFAULT_POOL_MULTIPLIER,
            mmr_enabled: true,
            mmr_lambda: 0.5,
        }
    }

    pub fn with_pool_multiplier(mut self, multiplier: usize) -> Self {
        self.pool_multiplier = multiplier.max(1);
        self
    }

    pub fn with_mmr(mut self, enabled: bool, lambda: f32) -> Self {
        self.mmr_enabled = enabled;
        self.mmr_lambda = lambda.clamp(0.0, 1.0);
        self
    }

    pub async fn fetch(
        &self,
        session_id: &str,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Vec<MemoryItem> {
        let Ok(query_vec) = self.embedding.generate_embedding(query, DEFAULT_EMBEDDING_MODEL).await else {
            log::debug!("semantic_memory: embedding generation failed, returning empty result");
            self.metrics.increment("semantic_memory_miss", &[("class", "semantic/qdrant")]);
            return Vec::new();
        };
        if query_vec.is_empty() {
            self.metrics.increment("semantic_memory_miss", &[("class", "semantic/qdrant")]);
            return Vec::new();
        }

        let pool_size = top_k.saturating_mul(self.pool_multiplier).max(top_k);
        let candidates = match self
            .vector_store
            .get_session_context_semantic(&query_vec, session_id, tenant_id, pool_size, threshold)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                log::debug!("semantic_memory: candidate fetch failed: {e}");
                self.metrics.increment("semantic_memory_miss", &[("class", "semantic/qdrant")]);
                return Vec::new();
            }
        };

        if candidates.is_empty() {
            self.metrics.increment("semantic_memory_miss", &[("class", "semantic/qdrant")]);
            return Vec::new();
        }
        self.metrics.increment("semantic_memory_hit", &[("class", "semantic/qdrant")]);

        let ordered = if self.mmr_enabled && candidates.iter().all(|c| c.vector.is_some()) {
            self.mmr_rerank(&query_vec, candidates)
        } else {
            candidates
        };

        let (chunked, unchunked) = partition_chunked(ordered);
        let aggregated = aggregate_chunks(chunked);

        let mut merged: Vec<MemoryItem> = unchunked
            .into_iter()
            .map(|item| MemoryItem {
                text: item.payload.get("answer").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                similarity_score: item.score,
                was_chunked: false,
                chunk_count: None,
                payload: item.payload,
            })
            .chain(aggregated)
            .collect();

        merged.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(top_k);
        merged
    }

    fn mmr_rerank(&self, query_vec: &[f32], candidates: Vec<SemanticItem>) -> Vec<SemanticItem> {
        let mut pool: Vec<SemanticItem> = candidates;
        let mut selected: Vec<SemanticItem> = Vec::with_capacity(pool.len());

        while !pool.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f32::MIN;
            for (idx, candidate) in pool.iter().enumerate() {
                let relevance = candidate
                    .vector
                    .as_deref()
                    .map(|v| cosine_similarity(query_vec, v))
                    .unwrap_or(candidate.score);
                let redundancy = selected
                    .iter()
                    .filter_map(|s| match (candidate.vector.as_deref(), s.vector.as_deref()) {
                        (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                        _ => None,
                    })
                    .fold(0.0_f32, f32::max);
                let mmr_score = self.mmr_lambda * relevance - (1.0 - self.mmr_lambda) * redundancy;
                if mmr_score > best_score {
                    best_score = mmr_score;
                    best_idx = idx;
                }
            }
            selected.push(pool.remove(best_idx));
        }

        selected
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let dot: f32 = a[..len].iter().zip(&b[..len]).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn partition_chunked(items: Vec<SemanticItem>) -> (Vec<SemanticItem>, Vec<SemanticItem>) {
    items.into_iter().partition(|i| {
        i.payload.get("is_chunked").and_then(|v| v.as_bool()).unwrap_or(false)
    })
}

fn decode_chunk_index(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)).or_else(|| {
        value.as_str().and_then(|s| s.parse::<i64>().ok())
    })
}

fn aggregate_chunks(chunked: Vec<SemanticItem>) -> Vec<MemoryItem> {
    let mut groups: HashMap<String, Vec<SemanticItem>> = HashMap::new();
    for item in chunked {
        let Some(qa_id) = item.payload.get("qa_id").and_then(|v| v.as_str()).map(str::to_string) else {
            continue;
        };
        groups.entry(qa_id).or_default().push(item);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, mut items) in groups {
        items.sort_by_key(|i| {
            i.payload.get("chunk_index").and_then(decode_chunk_index).unwrap_or(0)
        });

        let best_score = items.iter().map(|i| i.score).fold(f32::MIN, f32::max);
        let chunk_count = items
            .first()
            .and_then(|i| i.payload.get("chunk_count"))
            .and_then(decode_chunk_index)
            .map(|c| c as u32)
            .unwrap_or(items.len() as u32);

        let mut text = String::new();
        for (idx, item) in items.iter().enumerate() {
            let chunk_text = item.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            if idx == 0 {
                text.push_str(chunk_text);
            } else {
                let skip_bytes = nth_char_boundary(chunk_text, CHUNK_OVERLAP_CHARS);
                text.push_str(&chunk_text[skip_bytes..]);
            }
        }

        out.push(MemoryItem {
            text,
            similarity_score: best_score,
            was_chunked: true,
            chunk_count: Some(chunk_count),
            payload: serde_json::json!({ "_was_chunked": true, "_chunk_count": chunk_count }),
        });
    }
    out
}

/// Byte offset of the `n`th char boundary, or the string's length if it has
/// fewer than `n` chars — the overlap skip never panics on short chunks.
fn nth_char_boundary(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
