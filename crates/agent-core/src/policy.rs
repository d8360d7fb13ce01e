//! Policy Gate (C4).
//!
//! Builds a policy input from the execution input and ambient context,
//! optionally enriches it with vector-similarity context under a hard 5ms
//! deadline, then evaluates via the injected policy engine.

use crate::clients::{EmbeddingService, PolicyEngine, VectorStore};
use crate::error::AgentCoreError;
use crate::metrics::MetricsSink;
use crate::types::{
    AgentExecutionInput, ContextValue, PolicyDecision, PolicyInput, PolicyMode, SimilarQuery,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

const VECTOR_ENRICHMENT_DEADLINE: Duration = Duration::from_millis(5);
const SIMILAR_QUERY_LIMIT: usize = 5;
const EMBEDDING_MODEL: &str = "default";
const SIMILARITY_THRESHOLD: f32 = 0.0;

/// Outcome of a policy gate evaluation, already translated into the
/// pipeline-facing disposition described in §4.3/§7.
pub enum GateOutcome {
    /// Continue execution normally.
    Proceed,
    /// Enforce-mode denial: the pipeline must stop and return this result
    /// as a *successful* activity invocation (no error to the runtime).
    Denied { reason: String },
    /// Dry-run denial: continue, but the caller should emit the
    /// `dry_run_would_deny` metric (already done here).
    WouldDenyContinue,
    /// Approval required: continue is the workflow's call; the pipeline
    /// returns success=false with this reason.
    ApprovalRequired { reason: String },
}

/// Process-wide singleton access to the policy engine: reads take the
/// engine read lock, re-init takes the write lock and swaps the engine
/// atomically. Callers share one `PolicyGate` behind an `Arc`.
pub struct PolicyGate {
    engine: Arc<RwLock<Arc<dyn PolicyEngine>>>,
    embedding: Option<Arc<dyn EmbeddingService>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    metrics: Arc<dyn MetricsSink>,
    default_environment: Option<String>,
}

impl PolicyGate {
    pub fn new(engine: Arc<dyn PolicyEngine>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            embedding: None,
            vector_store: None,
            metrics,
            default_environment: None,
        }
    }

    /// Atomically swap in a new policy engine. Takes the write lock only
    /// for the duration of the swap; in-flight `evaluate` calls already
    /// holding the read lock finish against the old engine.
    pub fn reinit(&self, engine: Arc<dyn PolicyEngine>) {
        *self.engine.write() = engine;
    }

    pub fn with_vector_enrichment(
        mut self,
        embedding: Arc<dyn EmbeddingService>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        self.embedding = Some(embedding);
        self.vector_store = Some(vector_store);
        self
    }

    pub fn with_default_environment(mut self, env: impl Into<String>) -> Self {
        self.default_environment = Some(env.into());
        self
    }

    fn resolve_environment(&self) -> String {
        self.default_environment
            .clone()
            .or_else(|| std::env::var("ENVIRONMENT").ok())
            .unwrap_or_else(|| "dev".to_string())
    }

    fn build_policy_input(&self, input: &AgentExecutionInput, timestamp: i64) -> PolicyInput {
        let user_id = input
            .context
            .get("user_id")
            .and_then(ContextValue::as_str)
            .map(str::to_string);
        let complexity = input.context.get("complexity").and_then(ContextValue::as_f64);
        let token_budget = input.context.get("token_budget").and_then(ContextValue::as_i64);

        PolicyInput {
            session_id: input.session_id.clone(),
            agent_id: input.agent_id.clone(),
            user_id,
            query: input.query.clone(),
            mode: input.mode,
            environment: self.resolve_environment(),
            timestamp,
            complexity,
            token_budget,
            similar_queries: None,
            context_score: None,
        }
    }

    /// Best-effort: generate a query embedding and fetch similar prior
    /// queries, bounded by a hard 5ms wall-clock deadline. A timeout or any
    /// failure silently produces an enrichment-less input.
    async fn enrich_with_vector_context(&self, mut policy_input: PolicyInput, session_id: &str) -> PolicyInput {
        let (Some(embedding), Some(store)) = (&self.embedding, &self.vector_store) else {
            return policy_input;
        };

        let query = policy_input.query.clone();
        let embedding = embedding.clone();
        let store = store.clone();
        let session_id = session_id.to_string();

        let enrich = async move {
            let vec = embedding.generate_embedding(&query, EMBEDDING_MODEL).await.ok()?;
            if vec.is_empty() {
                return None;
            }
            let items = store
                .get_session_context_semantic(
                    &vec,
                    &session_id,
                    &session_id,
                    SIMILAR_QUERY_LIMIT,
                    SIMILARITY_THRESHOLD,
                )
                .await
                .ok()?;
            Some(items)
        };

        match tokio::time::timeout(VECTOR_ENRICHMENT_DEADLINE, enrich).await {
            Ok(Some(items)) if !items.is_empty() => {
                let max_confidence = items.iter().map(|i| i.score).fold(f32::MIN, f32::max);
                policy_input.similar_queries = Some(
                    items
                        .iter()
                        .map(|i| SimilarQuery {
                            query: i
                                .payload
                                .get("query")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            confidence: i.score,
                        })
                        .collect(),
                );
                policy_input.context_score = Some(max_confidence);
            }
            Ok(_) => {}
            Err(_) => {
                log::debug!("policy: vector enrichment exceeded 5ms deadline, proceeding without it");
            }
        }

        policy_input
    }

    /// Evaluate the policy gate for one execution input. `now_unix_ms` is
    /// passed in (rather than read from the clock) to keep callers in
    /// control of the timestamp used for the policy input.
    pub async fn evaluate(
        &self,
        input: &AgentExecutionInput,
        now_unix_ms: i64,
    ) -> Result<GateOutcome, AgentCoreError> {
        let policy_input = self.build_policy_input(input, now_unix_ms);
        let policy_input = self.enrich_with_vector_context(policy_input, &input.session_id).await;

        // Clone the Arc under the read lock rather than holding it across
        // the `.await` below — the engine itself is swapped, not mutated.
        let engine = self.engine.read().clone();

        let decision: PolicyDecision = engine
            .evaluate(policy_input)
            .await
            .map_err(|e| AgentCoreError::PolicyEvaluation { reason: e.to_string() })?;

        if decision.require_approval {
            return Ok(GateOutcome::ApprovalRequired { reason: decision.reason });
        }

        if !decision.allow {
            return match engine.mode() {
                PolicyMode::Enforce => Ok(GateOutcome::Denied { reason: decision.reason }),
                PolicyMode::DryRun => {
                    self.metrics.increment(
                        "dry_run_would_deny",
                        &[("activity", "agent_execution"), ("reason", &decision.reason)],
                    );
                    Ok(GateOutcome::WouldDenyContinue)
                }
            };
        }

        Ok(GateOutcome::Proceed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetrics;
    use crate::test_support::{FakeEmbeddingService, FakePolicyEngine, FakeVectorStore};
    use crate::types::ExecutionMode;

    fn sample_input() -> AgentExecutionInput {
        AgentExecutionInput {
            query: "what is the weather".into(),
            agent_id: "agent-1".into(),
            mode: ExecutionMode::Simple,
            session_id: "sess-1".into(),
            parent_workflow_id: None,
            conversation_history: vec![],
            persona_id: None,
            suggested_tools: vec![],
            tool_parameters: None,
            context: Default::default(),
            model_override: None,
            provider_override: None,
        }
    }

    #[tokio::test]
    async fn allow_decision_proceeds() {
        let engine = Arc::new(FakePolicyEngine::default());
        let gate = PolicyGate::new(engine, crate::metrics::noop());
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed));
    }

    #[tokio::test]
    async fn enforce_mode_denial_does_not_error() {
        let engine = Arc::new(FakePolicyEngine {
            decision: PolicyDecision {
                allow: false,
                reason: "quota".into(),
                require_approval: false,
            },
            mode: PolicyMode::Enforce,
            fail: false,
        });
        let gate = PolicyGate::new(engine, crate::metrics::noop());
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Denied { reason } if reason == "quota"));
    }

    #[tokio::test]
    async fn dry_run_denial_continues_and_emits_metric() {
        let engine = Arc::new(FakePolicyEngine {
            decision: PolicyDecision {
                allow: false,
                reason: "quota".into(),
                require_approval: false,
            },
            mode: PolicyMode::DryRun,
            fail: false,
        });
        let metrics = Arc::new(RecordingMetrics::default());
        let gate = PolicyGate::new(engine, metrics.clone());
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::WouldDenyContinue));
        assert_eq!(
            metrics.count("dry_run_would_deny", &[("activity", "agent_execution"), ("reason", "quota")]),
            1
        );
    }

    #[tokio::test]
    async fn evaluation_error_propagates() {
        let engine = Arc::new(FakePolicyEngine {
            fail: true,
            ..FakePolicyEngine::default()
        });
        let gate = PolicyGate::new(engine, crate::metrics::noop());
        let result = gate.evaluate(&sample_input(), 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn vector_enrichment_populates_similar_queries() {
        let engine = Arc::new(FakePolicyEngine::default());
        let embedding = Arc::new(FakeEmbeddingService::default());
        let store = Arc::new(FakeVectorStore::default());
        store.items.lock().push(crate::clients::SemanticItem {
            score: 0.9,
            vector: None,
            payload: serde_json::json!({"query": "similar past query"}),
        });
        let gate = PolicyGate::new(engine, crate::metrics::noop())
            .with_vector_enrichment(embedding, store);
        // Evaluate does not expose the enriched PolicyInput directly, but it
        // must still complete (and not error) within the deadline.
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed));
    }

    #[tokio::test]
    async fn reinit_atomically_swaps_the_engine() {
        let gate = PolicyGate::new(Arc::new(FakePolicyEngine::default()), crate::metrics::noop());
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed));

        gate.reinit(Arc::new(FakePolicyEngine {
            decision: PolicyDecision {
                allow: false,
                reason: "reinitialized".into(),
                require_approval: false,
            },
            mode: PolicyMode::Enforce,
            fail: false,
        }));
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Denied { reason } if reason == "reinitialized"));
    }

    #[tokio::test]
    async fn require_approval_surfaces_as_its_own_outcome() {
        let engine = Arc::new(FakePolicyEngine {
            decision: PolicyDecision {
                allow: true,
                reason: "complex task".into(),
                require_approval: true,
            },
            mode: PolicyMode::Enforce,
            fail: false,
        });
        let gate = PolicyGate::new(engine, crate::metrics::noop());
        let outcome = gate.evaluate(&sample_input(), 0).await.unwrap();
        assert!(matches!(outcome, GateOutcome::ApprovalRequired { .. }));
    }
}
