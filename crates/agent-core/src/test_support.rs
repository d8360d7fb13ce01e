//! Offline fakes for every external collaborator trait, used by
//! unit tests across the crate so nothing reaches a real network.

use crate::clients::{
    AgentQueryMetadata, AgentQueryRequest, AgentQueryResponse, AgentServiceClient, AgentUpdate,
    AgentUpdateStream, EmbeddingService, ExecuteTaskRequest, ExecuteTaskResponse, KvStore,
    LlmServiceClient, PolicyEngine, RoleInfo, SemanticItem, ToolCall, ToolMetadata,
    ToolSelectRequest, ToolSelectResponse, VectorPoint, VectorStore,
};
use crate::error::AgentCoreError;
use crate::types::{PolicyDecision, PolicyInput, PolicyMode};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ───────────────────────────── LLM service ────────────────────────────────

#[derive(Default)]
pub struct FakeLlmService {
    tool_costs: HashMap<String, f64>,
    roles: HashMap<String, Vec<String>>,
    roles_fail: bool,
    roles_calls: AtomicUsize,
    query_response: Option<AgentQueryResponse>,
    tool_select_response: ToolSelectResponse,
}

impl FakeLlmService {
    pub fn roles_call_count(&self) -> usize {
        self.roles_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmServiceClient for FakeLlmService {
    async fn agent_query(
        &self,
        _req: AgentQueryRequest,
    ) -> Result<AgentQueryResponse, AgentCoreError> {
        Ok(self.query_response.clone().unwrap_or(AgentQueryResponse {
            success: true,
            response: "ok".to_string(),
            tokens_used: Some(10),
            model_used: Some("test-model".to_string()),
            provider: Some("test-provider".to_string()),
            finish_reason: Some("stop".to_string()),
            metadata: AgentQueryMetadata::default(),
        }))
    }

    async fn tools_list(&self, _exclude_dangerous: bool) -> Result<Vec<String>, AgentCoreError> {
        Ok(self.tool_costs.keys().cloned().collect())
    }

    async fn tools_select(
        &self,
        _req: ToolSelectRequest,
    ) -> Result<ToolSelectResponse, AgentCoreError> {
        Ok(self.tool_select_response.clone())
    }

    async fn tool_metadata(&self, tool: &str) -> Result<ToolMetadata, AgentCoreError> {
        Ok(ToolMetadata {
            cost_per_use: *self.tool_costs.get(tool).unwrap_or(&0.0),
        })
    }

    async fn roles(&self) -> Result<HashMap<String, RoleInfo>, AgentCoreError> {
        self.roles_calls.fetch_add(1, Ordering::SeqCst);
        if self.roles_fail {
            return Err(AgentCoreError::Http {
                url: "roles".into(),
                reason: "unavailable".into(),
            });
        }
        Ok(self
            .roles
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    RoleInfo {
                        allowed_tools: v.clone(),
                    },
                )
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeLlmServiceBuilder {
    tool_costs: HashMap<String, f64>,
    roles: HashMap<String, Vec<String>>,
    roles_fail: bool,
    query_response: Option<AgentQueryResponse>,
    tool_select_response: ToolSelectResponse,
}

impl FakeLlmServiceBuilder {
    pub fn new() -> Self {
        Self {
            tool_select_response: ToolSelectResponse::default(),
            ..Default::default()
        }
    }

    pub fn with_tool_cost(mut self, tool: &str, cost: f64) -> Self {
        self.tool_costs.insert(tool.to_string(), cost);
        self
    }

    pub fn with_role(mut self, role: &str, tools: Vec<String>) -> Self {
        self.roles.insert(role.to_string(), tools);
        self
    }

    pub fn with_roles_failing(mut self) -> Self {
        self.roles_fail = true;
        self
    }

    pub fn with_query_response(mut self, response: AgentQueryResponse) -> Self {
        self.query_response = Some(response);
        self
    }

    pub fn with_tool_select(mut self, selected: Vec<String>, calls: Vec<ToolCall>) -> Self {
        self.tool_select_response = ToolSelectResponse {
            selected_tools: selected,
            calls,
        };
        self
    }

    pub fn build(self) -> FakeLlmService {
        FakeLlmService {
            tool_costs: self.tool_costs,
            roles: self.roles,
            roles_fail: self.roles_fail,
            roles_calls: AtomicUsize::new(0),
            query_response: self.query_response,
            tool_select_response: self.tool_select_response,
        }
    }
}

// ───────────────────────────── Agent service ──────────────────────────────

pub struct FakeAgentService {
    pub unary_response: Mutex<ExecuteTaskResponse>,
    pub stream_updates: Mutex<Vec<Result<AgentUpdate, AgentCoreError>>>,
}

impl Default for FakeAgentService {
    fn default() -> Self {
        Self {
            unary_response: Mutex::new(ExecuteTaskResponse {
                success: true,
                response: "unary ok".to_string(),
                model: Some("test-model".to_string()),
                provider: Some("test-provider".to_string()),
                input_tokens: 5,
                output_tokens: 5,
                total_tokens: 10,
                cost_usd: 0.0,
                error: None,
            }),
            stream_updates: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl AgentServiceClient for FakeAgentService {
    async fn execute_task(
        &self,
        _req: ExecuteTaskRequest,
    ) -> Result<ExecuteTaskResponse, AgentCoreError> {
        Ok(self.unary_response.lock().clone())
    }

    async fn stream_execute_task(
        &self,
        _req: ExecuteTaskRequest,
    ) -> Result<AgentUpdateStream, AgentCoreError> {
        let updates = self.stream_updates.lock().clone();
        Ok(Box::pin(stream::iter(updates)))
    }
}

// ExecuteTaskResponse, AgentUpdate, and AgentToolResult already derive Clone
// in clients.rs.

// ───────────────────────────── Vector DB / embeddings ─────────────────────

#[derive(Default)]
pub struct FakeEmbeddingService {
    pub fail: bool,
    pub dim: usize,
}

#[async_trait]
impl EmbeddingService for FakeEmbeddingService {
    async fn generate_embedding(&self, text: &str, _model: &str) -> Result<Vec<f32>, AgentCoreError> {
        if self.fail {
            return Err(AgentCoreError::Http {
                url: "embed".into(),
                reason: "down".into(),
            });
        }
        let dim = if self.dim == 0 { 4 } else { self.dim };
        Ok(deterministic_vector(text, dim))
    }

    async fn generate_batch_embeddings(
        &self,
        texts: &[String],
        model: &str,
    ) -> Result<Vec<Vec<f32>>, AgentCoreError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.generate_embedding(t, model).await?);
        }
        Ok(out)
    }
}

fn deterministic_vector(seed: &str, dim: usize) -> Vec<f32> {
    let hash = crate::hash::Hash6::of_sentence(seed);
    let base = u32::from_str_radix(hash.as_str(), 16).unwrap_or(1) as f32;
    (0..dim).map(|i| ((base + i as f32) % 97.0) / 97.0).collect()
}

#[derive(Default)]
pub struct FakeVectorStore {
    pub items: Mutex<Vec<SemanticItem>>,
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn get_session_context_semantic(
        &self,
        _vec: &[f32],
        _session: &str,
        _tenant: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticItem>, AgentCoreError> {
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|i| i.score >= threshold)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<Vec<String>, AgentCoreError> {
        let ids: Vec<String> = points
            .iter()
            .enumerate()
            .map(|(i, p)| p.id.clone().unwrap_or_else(|| format!("point-{i}")))
            .collect();
        Ok(ids)
    }
}

// ───────────────────────────── KV store ───────────────────────────────────

#[derive(Default)]
pub struct FakeKvStore {
    counters: Mutex<HashMap<String, i64>>,
    lists: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

#[async_trait]
impl KvStore for FakeKvStore {
    async fn incr(&self, key: &str) -> Result<i64, AgentCoreError> {
        let mut counters = self.counters.lock();
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), AgentCoreError> {
        self.lists.lock().entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, AgentCoreError> {
        let lists = self.lists.lock();
        let Some(list) = lists.get(key) else {
            return Ok(vec![]);
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let start = norm(start) as usize;
        let stop = (norm(stop) + 1).max(0) as usize;
        Ok(list.get(start..stop.min(list.len())).unwrap_or(&[]).to_vec())
    }

    async fn llen(&self, key: &str) -> Result<i64, AgentCoreError> {
        Ok(self.lists.lock().get(key).map(|l| l.len() as i64).unwrap_or(0))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), AgentCoreError> {
        Ok(())
    }
}

// ───────────────────────────── Policy engine ──────────────────────────────

pub struct FakePolicyEngine {
    pub decision: PolicyDecision,
    pub mode: PolicyMode,
    pub fail: bool,
}

impl Default for FakePolicyEngine {
    fn default() -> Self {
        Self {
            decision: PolicyDecision {
                allow: true,
                reason: "ok".to_string(),
                require_approval: false,
            },
            mode: PolicyMode::Enforce,
            fail: false,
        }
    }
}

#[async_trait]
impl PolicyEngine for FakePolicyEngine {
    async fn evaluate(&self, _input: PolicyInput) -> Result<PolicyDecision, AgentCoreError> {
        if self.fail {
            return Err(AgentCoreError::PolicyEvaluation {
                reason: "engine unreachable".into(),
            });
        }
        Ok(self.decision.clone())
    }

    fn mode(&self) -> PolicyMode {
        self.mode
    }
}

// PolicyDecision already derives Clone in types.rs.

/// Test-only event observer recording every event it sees.
pub struct RecordingObserver {
    pub events: Mutex<Vec<crate::events::AgentCoreEvent>>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self {
            events: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl crate::events::EventObserver for RecordingObserver {
    async fn on_event(&self, event: &crate::events::AgentCoreEvent) -> Result<(), AgentCoreError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
