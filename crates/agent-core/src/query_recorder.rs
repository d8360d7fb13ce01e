//! Query Recorder (C8).
//!
//! Records a successful Q/A turn to the vector store for future semantic
//! memory fetches, after PII redaction, skip heuristics, and near-duplicate
//! suppression.

use crate::clients::{EmbeddingService, VectorPoint, VectorStore};
use crate::error::AgentCoreError;
use crate::semantic_memory::CHUNK_OVERLAP_CHARS;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

const MIN_ANSWER_LEN: usize = 50;
const DEDUP_SIMILARITY_THRESHOLD: f32 = 0.95;
const DEFAULT_EMBEDDING_MODEL: &str = "default";
const CHUNK_SIZE_CHARS: usize = 2_000;

const ERROR_PHRASES: &[&str] = &[
    "i don't know",
    "i do not know",
    "unable to find",
    "no information available",
    "i cannot answer",
    "an error occurred",
];

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid email regex"));
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+?\d{1,3}[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4}").expect("valid phone regex"));

pub fn redact_pii(text: &str) -> String {
    let redacted = EMAIL_PATTERN.replace_all(text, "***@***");
    PHONE_PATTERN.replace_all(&redacted, "***PHONE***").into_owned()
}

fn is_skippable(answer: &str) -> bool {
    if answer.chars().count() < MIN_ANSWER_LEN {
        return true;
    }
    let lower = answer.to_ascii_lowercase();
    ERROR_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

pub struct RecordQueryInput {
    pub session_id: String,
    pub user_id: Option<String>,
    pub tenant_id: String,
    pub model: Option<String>,
    pub query: String,
    pub answer: String,
    pub redact_pii: bool,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub struct QueryRecorder {
    embedding: Arc<dyn EmbeddingService>,
    vector_store: Arc<dyn VectorStore>,
}

impl QueryRecorder {
    pub fn new(embedding: Arc<dyn EmbeddingService>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self { embedding, vector_store }
    }

    /// Returns `Ok(None)` when the turn was skipped (too short, error
    /// phrase, or a near-duplicate of a prior recorded turn) — never an
    /// error for those cases, since recording is best-effort.
    pub async fn record(&self, input: RecordQueryInput) -> Result<Option<Vec<String>>, AgentCoreError> {
        let answer = if input.redact_pii { redact_pii(&input.answer) } else { input.answer.clone() };

        if is_skippable(&answer) {
            log::debug!("query_recorder: skipping short or error-phrase answer");
            return Ok(None);
        }

        let query_vec = self.embedding.generate_embedding(&input.query, DEFAULT_EMBEDDING_MODEL).await?;
        if query_vec.is_empty() {
            return Ok(None);
        }

        if self.is_duplicate(&query_vec, &input.session_id, &input.tenant_id).await {
            log::debug!("query_recorder: skipping near-duplicate of a previously recorded query");
            return Ok(None);
        }

        let qa_id = uuid::Uuid::new_v4().to_string();
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();

        let base_payload = |extra: serde_json::Value| -> serde_json::Value {
            let mut obj = match extra {
                serde_json::Value::Object(m) => m,
                _ => serde_json::Map::new(),
            };
            obj.insert("session_id".into(), input.session_id.clone().into());
            obj.insert("tenant_id".into(), input.tenant_id.clone().into());
            if let Some(user_id) = &input.user_id {
                obj.insert("user_id".into(), user_id.clone().into());
            }
            if let Some(model) = &input.model {
                obj.insert("model".into(), model.clone().into());
            }
            obj.insert("timestamp".into(), timestamp.into());
            obj.insert("qa_id".into(), qa_id.clone().into());
            for (k, v) in &input.metadata {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
            serde_json::Value::Object(obj)
        };

        if answer.chars().count() > CHUNK_SIZE_CHARS {
            let chunks = chunk_text(&answer, CHUNK_SIZE_CHARS, CHUNK_OVERLAP_CHARS);
            let chunk_texts: Vec<String> = chunks.clone();
            let vectors = self.embedding.generate_batch_embeddings(&chunk_texts, DEFAULT_EMBEDDING_MODEL).await?;

            let points: Vec<VectorPoint> = chunks
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(idx, (chunk, vector))| VectorPoint {
                    id: None,
                    vector,
                    payload: base_payload(serde_json::json!({
                        "text": chunk,
                        "is_chunked": true,
                        "chunk_index": idx,
                        "chunk_count": chunks.len(),
                        "chunk_overlap": CHUNK_OVERLAP_CHARS,
                    })),
                })
                .collect();
            return self.vector_store.upsert(points).await.map(Some);
        }

        let point = VectorPoint {
            id: None,
            vector: query_vec,
            payload: base_payload(serde_json::json!({ "answer": answer })),
        };
        self.vector_store.upsert(vec![point]).await.map(Some)
    }

    async fn is_duplicate(&self, query_vec: &[f32], session_id: &str, tenant_id: &str) -> bool {
        match self
            .vector_store
            .get_session_context_semantic(query_vec, session_id, tenant_id, 1, 0.0)
            .await
        {
            Ok(items) => items.first().map(|i| i.score >= DEDUP_SIMILARITY_THRESHOLD).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Splits `text` into overlapping chunks so the read side
/// (`semantic_memory::aggregate_chunks`) can skip `overlap` characters off
/// every chunk after the first and reassemble the original byte-for-byte.
/// Every chunk but the last is exactly `chunk_size` long; the last covers
/// whatever remains.
pub(crate) fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeEmbeddingService, FakeVectorStore};

    fn sample_input(answer: &str) -> RecordQueryInput {
        RecordQueryInput {
            session_id: "sess-1".into(),
            user_id: Some("user-1".into()),
            tenant_id: "tenant-1".into(),
            model: Some("gpt-4o-mini".into()),
            query: "what is the capital of france".into(),
            answer: answer.to_string(),
            redact_pii: true,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn email_and_phone_are_redacted() {
        let text = "contact me at a@b.com or 555-123-4567";
        let redacted = redact_pii(text);
        assert!(redacted.contains("***@***"));
        assert!(redacted.contains("***PHONE***"));
    }

    #[tokio::test]
    async fn short_answers_are_skipped() {
        let recorder = QueryRecorder::new(
            Arc::new(FakeEmbeddingService::default()),
            Arc::new(FakeVectorStore::default()),
        );
        let result = recorder.record(sample_input("too short")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn error_phrase_answers_are_skipped() {
        let recorder = QueryRecorder::new(
            Arc::new(FakeEmbeddingService::default()),
            Arc::new(FakeVectorStore::default()),
        );
        let long_error = "I don't know the answer to this question, despite searching extensively through all of the available sources.";
        let result = recorder.record(sample_input(long_error)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn good_answer_is_recorded() {
        let recorder = QueryRecorder::new(
            Arc::new(FakeEmbeddingService::default()),
            Arc::new(FakeVectorStore::default()),
        );
        let answer = "Paris is the capital of France, and it has been since many centuries ago in history.";
        let result = recorder.record(sample_input(answer)).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn near_duplicate_is_skipped() {
        let store = Arc::new(FakeVectorStore::default());
        store.items.lock().push(crate::clients::SemanticItem {
            score: 0.99,
            vector: None,
            payload: serde_json::json!({}),
        });
        let recorder = QueryRecorder::new(Arc::new(FakeEmbeddingService::default()), store);
        let answer = "Paris is the capital of France, and it has been since many centuries ago in history.";
        let result = recorder.record(sample_input(answer)).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn chunking_splits_long_text_by_char_count() {
        let text = "a".repeat(5_000);
        let chunks = chunk_text(&text, CHUNK_SIZE_CHARS, CHUNK_OVERLAP_CHARS);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].chars().count(), CHUNK_SIZE_CHARS);
    }

    #[test]
    fn chunking_overlap_allows_exact_reassembly() {
        let text: String = (0..5_000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let chunks = chunk_text(&text, CHUNK_SIZE_CHARS, CHUNK_OVERLAP_CHARS);
        assert!(chunks.len() > 1);

        let mut reassembled = String::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            if idx == 0 {
                reassembled.push_str(chunk);
            } else {
                let new_content: String = chunk.chars().skip(CHUNK_OVERLAP_CHARS).collect();
                reassembled.push_str(&new_content);
            }
        }
        assert_eq!(reassembled, text);
    }
}
