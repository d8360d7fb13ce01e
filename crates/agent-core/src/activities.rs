//! Composition-root facade (§5/§9: "the `Activities` struct is shared,
//! stateless per request, and safe for concurrent use").
//!
//! Activities never call each other directly — each method here is a thin,
//! independent entry point the durable runtime schedules; shared logic
//! lives inside the individual components, not in cross-activity calls
//! through this facade. Every field is an `Arc`, so `Activities` itself
//! holds no per-request state and is cheap to clone and share across
//! worker threads.

use crate::citation::{CitationEngine, CitationResult};
use crate::error::AgentCoreError;
use crate::forced_tool::ForcedToolPath;
use crate::p2p::P2PMessaging;
use crate::query_recorder::{QueryRecorder, RecordQueryInput};
use crate::research_refiner::{ResearchPlan, ResearchRefiner};
use crate::roles::RoleDiscovery;
use crate::selection::{epsilon_greedy, ucb1};
use crate::semantic_memory::{MemoryItem, SemanticMemoryFetch};
use crate::subquery::{Subquery, SubqueryGenInput, SubqueryGenerator};
use crate::tool_cost::ToolCostCache;
use crate::types::{AgentExecutionInput, AgentExecutionResult, AgentPerformance, Citation, ClaimMapping, MessageTag, P2PMessage, WorkspaceEntry};
use std::sync::Arc;

use crate::pipeline::AgentExecutionPipeline;

/// Bundles every activity this crate exposes behind one shared handle.
/// A host binary builds one `Activities` at startup and clones it (cheap —
/// every field is an `Arc`) into each worker.
#[derive(Clone)]
pub struct Activities {
    pipeline: Arc<AgentExecutionPipeline>,
    forced_tool: Arc<ForcedToolPath>,
    semantic_memory: Arc<SemanticMemoryFetch>,
    query_recorder: Arc<QueryRecorder>,
    research_refiner: Arc<ResearchRefiner>,
    subquery_generator: Arc<SubqueryGenerator>,
    citation_engine: Arc<CitationEngine>,
    role_discovery: Arc<RoleDiscovery>,
    tool_cost: Arc<ToolCostCache>,
    p2p: Arc<P2PMessaging>,
}

impl Activities {
    pub fn new(
        pipeline: Arc<AgentExecutionPipeline>,
        forced_tool: Arc<ForcedToolPath>,
        semantic_memory: Arc<SemanticMemoryFetch>,
        query_recorder: Arc<QueryRecorder>,
        research_refiner: Arc<ResearchRefiner>,
        subquery_generator: Arc<SubqueryGenerator>,
        citation_engine: Arc<CitationEngine>,
        role_discovery: Arc<RoleDiscovery>,
        tool_cost: Arc<ToolCostCache>,
        p2p: Arc<P2PMessaging>,
    ) -> Self {
        Self {
            pipeline,
            forced_tool,
            semantic_memory,
            query_recorder,
            research_refiner,
            subquery_generator,
            citation_engine,
            role_discovery,
            tool_cost,
            p2p,
        }
    }

    /// C5: run the full agent execution pipeline for one subtask.
    pub async fn execute_agent(
        &self,
        input: AgentExecutionInput,
        runtime_workflow_id: &str,
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        self.pipeline.execute(input, runtime_workflow_id).await
    }

    /// C6: the forced-tool bypass path, when a caller already knows which
    /// tool must run and wants to skip planning.
    pub async fn execute_forced_tool(
        &self,
        input: &AgentExecutionInput,
        runtime_workflow_id: &str,
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        self.forced_tool.execute(input, runtime_workflow_id).await
    }

    /// C7: semantic memory fetch for session/tenant-scoped context.
    pub async fn fetch_semantic_memory(
        &self,
        session_id: &str,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Vec<MemoryItem> {
        self.semantic_memory.fetch(session_id, tenant_id, query, top_k, threshold).await
    }

    /// C8: best-effort query/answer recording for future semantic recall.
    pub async fn record_query(&self, input: RecordQueryInput) -> Result<Option<Vec<String>>, AgentCoreError> {
        self.query_recorder.record(input).await
    }

    /// C9: one-shot research refinement into a structured plan.
    pub async fn refine_research(&self, query: &str, agent_id: &str) -> ResearchPlan {
        self.research_refiner.refine(query, agent_id).await
    }

    /// C10: subquery generation for a research iteration.
    pub async fn generate_subqueries(&self, input: &SubqueryGenInput, agent_id: &str) -> Vec<Subquery> {
        self.subquery_generator.generate(input, agent_id).await
    }

    /// C11: citation placement (indexed protocol, inline fallback).
    pub async fn place_citations(
        &self,
        report: &str,
        citations: &[Citation],
        agent_id: &str,
    ) -> Result<CitationResult, AgentCoreError> {
        self.citation_engine.place(report, citations, agent_id).await
    }

    /// C11: citation placement when claim-source matching already ran.
    pub async fn place_verified_citations(
        &self,
        report: &str,
        citations: &[Citation],
        mappings: &[ClaimMapping],
        agent_id: &str,
    ) -> Result<CitationResult, AgentCoreError> {
        self.citation_engine.place_verified(report, citations, mappings, agent_id).await
    }

    /// C3: allowed tools for a role.
    pub async fn allowed_tools_for_role(&self, role: &str) -> Vec<String> {
        self.role_discovery.allowed_tools(role).await
    }

    /// C2: per-tool USD cost, TTL-cached.
    pub async fn tool_cost(&self, tool: &str) -> f64 {
        self.tool_cost.get(tool).await
    }

    /// C12: ε-greedy agent selection. Pure and synchronous — no activity
    /// suspension needed, but exposed here so callers go through one facade.
    pub fn select_agent_epsilon_greedy(
        &self,
        performances: &[AgentPerformance],
        available_agent_ids: &[String],
        epsilon: f64,
    ) -> String {
        epsilon_greedy(performances, available_agent_ids, epsilon)
    }

    /// C12: UCB1 agent selection.
    pub fn select_agent_ucb1(&self, performances: &[AgentPerformance]) -> String {
        ucb1(performances)
    }

    /// C14: send a P2P message.
    pub async fn send_message(
        &self,
        workflow_id: &str,
        from: &str,
        to: &str,
        tag: MessageTag,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<P2PMessage, AgentCoreError> {
        self.p2p.send(workflow_id, from, to, tag, payload).await
    }

    /// C14: fetch a mailbox's trailing window.
    pub async fn fetch_messages(
        &self,
        workflow_id: &str,
        to: &str,
        since_seq: u64,
        limit: Option<i64>,
    ) -> Result<Vec<P2PMessage>, AgentCoreError> {
        self.p2p.fetch(workflow_id, to, since_seq, limit).await
    }

    /// C14: append to the shared workspace ledger.
    pub async fn append_workspace(
        &self,
        workflow_id: &str,
        agent_id: &str,
        topic: &str,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WorkspaceEntry, AgentCoreError> {
        self.p2p.append_workspace(workflow_id, agent_id, topic, payload).await
    }

    /// C14: fetch a workspace topic's trailing window.
    pub async fn fetch_workspace(
        &self,
        workflow_id: &str,
        topic: &str,
        since_seq: u64,
        limit: Option<i64>,
    ) -> Result<Vec<WorkspaceEntry>, AgentCoreError> {
        self.p2p.fetch_workspace(workflow_id, topic, since_seq, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventPublisher;
    use crate::metrics::noop;
    use crate::policy::PolicyGate;
    use crate::test_support::{FakeAgentService, FakeEmbeddingService, FakeKvStore, FakeLlmServiceBuilder, FakePolicyEngine, FakeVectorStore};
    use crate::types::{ContextMap, ExecutionMode};
    use std::time::Duration;

    fn activities() -> Activities {
        let llm = Arc::new(FakeLlmServiceBuilder::new().build());
        let policy = Arc::new(PolicyGate::new(Arc::new(FakePolicyEngine::default()), noop()));
        let tool_cost = Arc::new(ToolCostCache::new(llm.clone(), Duration::from_secs(60)));
        let events = Arc::new(EventPublisher::new());
        let embedding = Arc::new(FakeEmbeddingService::default());
        let vector_store = Arc::new(FakeVectorStore::default());
        let kv = Arc::new(FakeKvStore::default());

        let pipeline = Arc::new(AgentExecutionPipeline::new(
            llm.clone(),
            Arc::new(FakeAgentService::default()),
            policy.clone(),
            tool_cost.clone(),
            events.clone(),
            noop(),
            crate::config::FeatureConfig::default(),
        ));
        let forced_tool = Arc::new(ForcedToolPath::new(llm.clone(), tool_cost.clone(), events.clone()));
        let semantic_memory = Arc::new(SemanticMemoryFetch::new(embedding.clone(), vector_store.clone(), noop()));
        let query_recorder = Arc::new(QueryRecorder::new(embedding, vector_store));
        let research_refiner = Arc::new(ResearchRefiner::new(llm.clone()));
        let subquery_generator = Arc::new(SubqueryGenerator::new(llm.clone()));
        let citation_engine = Arc::new(CitationEngine::new(llm.clone()));
        let role_discovery = Arc::new(RoleDiscovery::new(llm));
        let p2p = Arc::new(P2PMessaging::new(kv, policy, events));

        Activities::new(
            pipeline,
            forced_tool,
            semantic_memory,
            query_recorder,
            research_refiner,
            subquery_generator,
            citation_engine,
            role_discovery,
            tool_cost,
            p2p,
        )
    }

    fn sample_input() -> AgentExecutionInput {
        AgentExecutionInput {
            query: "2 + 2".into(),
            agent_id: "agent-1".into(),
            mode: ExecutionMode::Simple,
            session_id: "sess-1".into(),
            parent_workflow_id: None,
            conversation_history: vec![],
            persona_id: None,
            suggested_tools: vec![],
            tool_parameters: None,
            context: ContextMap::new(),
            model_override: None,
            provider_override: None,
        }
    }

    #[tokio::test]
    async fn execute_agent_delegates_to_the_pipeline() {
        let result = activities().execute_agent(sample_input(), "wf-1").await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn clone_is_cheap_and_shares_state() {
        let a = activities();
        let b = a.clone();
        // Both handles see the same underlying tool-cost cache.
        let cost_a = a.tool_cost("search").await;
        let cost_b = b.tool_cost("search").await;
        assert_eq!(cost_a, cost_b);
    }

    #[tokio::test]
    async fn selection_helpers_are_exposed_without_suspension() {
        let performances = vec![AgentPerformance {
            agent_id: "solo".into(),
            success_rate: 1.0,
            run_count: 10,
            avg_tokens: 100.0,
            avg_duration_ms: 50.0,
        }];
        assert_eq!(activities().select_agent_ucb1(&performances), "solo");
    }
}
