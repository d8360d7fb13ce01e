//! External collaborator contracts. Everything here is a trait:
//! the concrete LLM service, agent service, vector DB, embedding service,
//! policy engine, KV store, and relational store are deliberately out of
//! scope — this crate only defines and consumes the contracts.

use crate::error::AgentCoreError;
use crate::types::{PolicyDecision, PolicyInput, PolicyMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ───────────────────────────── LLM service (HTTP/JSON, §6.1) ─────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentQueryRequest {
    pub query: String,
    pub context: serde_json::Value,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub agent_id: String,
    pub model_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_tool_calls: Option<Vec<ForcedToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedToolCall {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentQueryResponse {
    pub success: bool,
    pub response: String,
    pub tokens_used: Option<u64>,
    pub model_used: Option<String>,
    pub provider: Option<String>,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: AgentQueryMetadata,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentQueryMetadata {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSelectRequest {
    pub task: String,
    pub context: serde_json::Value,
    pub exclude_dangerous: bool,
    pub max_tools: u32,
    /// Propagated as `X-Parent-Workflow-ID` so event streams stay unified.
    pub parent_workflow_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolSelectResponse {
    pub selected_tools: Vec<String>,
    pub calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolMetadata {
    pub cost_per_use: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleInfo {
    pub allowed_tools: Vec<String>,
}

#[async_trait]
pub trait LlmServiceClient: Send + Sync {
    async fn agent_query(
        &self,
        req: AgentQueryRequest,
    ) -> Result<AgentQueryResponse, AgentCoreError>;
    async fn tools_list(&self, exclude_dangerous: bool) -> Result<Vec<String>, AgentCoreError>;
    async fn tools_select(
        &self,
        req: ToolSelectRequest,
    ) -> Result<ToolSelectResponse, AgentCoreError>;
    async fn tool_metadata(&self, tool: &str) -> Result<ToolMetadata, AgentCoreError>;
    async fn roles(&self) -> Result<HashMap<String, RoleInfo>, AgentCoreError>;
}

// ───────────────────────────── Agent service (gRPC, §6.2) ────────────────

#[derive(Debug, Clone)]
pub struct ExecuteTaskRequest {
    pub workflow_id: String,
    pub agent_id: String,
    pub query: String,
    pub context_json: String,
    pub mode: crate::types::ExecutionMode,
    pub session_context_json: Option<String>,
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    pub timeout_seconds: u32,
    pub enable_sandbox: bool,
    pub memory_limit_mb: u32,
    pub enable_learning: bool,
}

#[derive(Debug, Clone)]
pub struct ExecuteTaskResponse {
    pub success: bool,
    pub response: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AgentUpdate {
    TextDelta(String),
    ToolResult(AgentToolResult),
    UsageMetrics(UsageMetricsUpdate),
    State(AgentState),
    FinalMessage(String),
}

#[derive(Debug, Clone)]
pub struct AgentToolResult {
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageMetricsUpdate {
    pub prompt_tokens: Option<f64>,
    pub completion_tokens: Option<f64>,
    pub total_tokens: Option<f64>,
    pub cost_usd: Option<f64>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Running,
    Completed,
    Failed,
}

pub type AgentUpdateStream =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<AgentUpdate, AgentCoreError>> + Send>>;

#[async_trait]
pub trait AgentServiceClient: Send + Sync {
    async fn execute_task(
        &self,
        req: ExecuteTaskRequest,
    ) -> Result<ExecuteTaskResponse, AgentCoreError>;

    async fn stream_execute_task(
        &self,
        req: ExecuteTaskRequest,
    ) -> Result<AgentUpdateStream, AgentCoreError>;
}

// ───────────────────────────── Vector DB / embeddings (§6.4) ─────────────

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn generate_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, AgentCoreError>;
    async fn generate_batch_embeddings(
        &self,
        texts: &[String],
        model: &str,
    ) -> Result<Vec<Vec<f32>>, AgentCoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticItem {
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: Option<String>,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn get_session_context_semantic(
        &self,
        vec: &[f32],
        session: &str,
        tenant: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticItem>, AgentCoreError>;

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<Vec<String>, AgentCoreError>;
}

// ───────────────────────────── KV store (mailbox/workspace, §6.6) ────────

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, AgentCoreError>;
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), AgentCoreError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, AgentCoreError>;
    async fn llen(&self, key: &str) -> Result<i64, AgentCoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AgentCoreError>;
}

// ───────────────────────────── Policy engine (§6, §9) ────────────────────

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, input: PolicyInput) -> Result<PolicyDecision, AgentCoreError>;
    fn mode(&self) -> PolicyMode;
}

// ───────────────────────────── Relational store (§6.5) ───────────────────
//
// No SQL implementation ships (durable runtime and storage engine are out
// of scope); only the trait and its row DTOs, so a host can wire a real
// store behind the same seam the pipeline/recorder use.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionRow {
    pub workflow_id: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub query: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<u64>,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost_usd: f64,
    pub model_used: Option<String>,
    pub provider: Option<String>,
    pub trigger_type: String,
    pub schedule_id: Option<String>,
    pub result: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskRow {
    pub id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub status: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskExecutionRow {
    pub schedule_id: String,
    pub task_id: String,
    pub triggered_at: i64,
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn upsert_task_execution(&self, row: TaskExecutionRow) -> Result<(), AgentCoreError>;
    async fn upsert_scheduled_task(&self, row: ScheduledTaskRow) -> Result<(), AgentCoreError>;
    /// `ON CONFLICT DO NOTHING` semantics: a duplicate (schedule_id, task_id)
    /// is not an error.
    async fn record_scheduled_task_execution(
        &self,
        row: ScheduledTaskExecutionRow,
    ) -> Result<(), AgentCoreError>;
}
