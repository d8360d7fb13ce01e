//! Core data model shared across components.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Execution mode requested for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Simple,
    Standard,
    Complex,
}

/// A structurally-typed value for the sanitized context bag (§9 design
/// notes: "model the context map as a tagged union of the permitted value
/// kinds"). An ordered map is used so sanitized maps echo back to the LLM
/// and to logs in a deterministic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ContextValue>),
    Map(IndexMap<String, ContextValue>),
}

impl ContextValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ContextValue::Null => "null",
            ContextValue::Bool(_) => "bool",
            ContextValue::Int(_) => "int",
            ContextValue::Float(_) => "float",
            ContextValue::Str(_) => "string",
            ContextValue::List(_) => "list",
            ContextValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Float(f) => Some(*f),
            ContextValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Int(i) => Some(*i),
            ContextValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<&JsonValue> for ContextValue {
    fn from(v: &JsonValue) -> Self {
        match v {
            JsonValue::Null => ContextValue::Null,
            JsonValue::Bool(b) => ContextValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ContextValue::Int(i)
                } else {
                    ContextValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => ContextValue::Str(s.clone()),
            JsonValue::Array(a) => ContextValue::List(a.iter().map(ContextValue::from).collect()),
            JsonValue::Object(m) => ContextValue::Map(
                m.iter()
                    .map(|(k, v)| (k.clone(), ContextValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&ContextValue> for JsonValue {
    fn from(v: &ContextValue) -> Self {
        match v {
            ContextValue::Null => JsonValue::Null,
            ContextValue::Bool(b) => JsonValue::Bool(*b),
            ContextValue::Int(i) => JsonValue::from(*i),
            ContextValue::Float(f) => {
                serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            ContextValue::Str(s) => JsonValue::String(s.clone()),
            ContextValue::List(l) => JsonValue::Array(l.iter().map(JsonValue::from).collect()),
            ContextValue::Map(m) => {
                JsonValue::Object(m.iter().map(|(k, v)| (k.clone(), JsonValue::from(v))).collect())
            }
        }
    }
}

pub type ContextMap = IndexMap<String, ContextValue>;

/// One subtask to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionInput {
    pub query: String,
    /// Logical agent id, not a physical address.
    pub agent_id: String,
    pub mode: ExecutionMode,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_parameters: Option<IndexMap<String, JsonValue>>,
    #[serde(default)]
    pub context: ContextMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
}

impl AgentExecutionInput {
    /// `workflow_id` used for event correlation: parent if present, else the
    /// caller must provide a runtime-assigned id (handled at the call site).
    pub fn event_workflow_id<'a>(&'a self, runtime_assigned: &'a str) -> &'a str {
        self.parent_workflow_id.as_deref().unwrap_or(runtime_assigned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Result of one tool invocation during agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response from the agent execution pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub response: String,
    pub tokens_used: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Deduplicated, order-preserving (first-appearance order).
    pub tools_used: Vec<String>,
    pub tool_executions: Vec<ToolExecution>,
    pub cost_usd: f64,
}

impl AgentExecutionResult {
    pub fn empty_failure(error: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            tokens_used: 0,
            input_tokens: 0,
            output_tokens: 0,
            model: None,
            provider: None,
            duration_ms: 0,
            success: false,
            error: Some(error.into()),
            tools_used: Vec::new(),
            tool_executions: Vec::new(),
            cost_usd: 0.0,
        }
    }
}

/// A persona/system-prompt profile overlaid onto an execution (§4.4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub token_budget_tier: String,
    /// Advisory: an empty intersection with service-available tools drops
    /// the constraint rather than producing an empty allowlist.
    pub allowed_tools: Vec<String>,
}

/// Policy evaluation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    pub session_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub query: String,
    pub mode: ExecutionMode,
    pub environment: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_queries: Option<Vec<SimilarQuery>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarQuery {
    pub query: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Enforce,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    pub reason: String,
    pub require_approval: bool,
}

/// Tool cost cache entry (C2).
#[derive(Debug, Clone, Copy)]
pub struct ToolCostEntry {
    pub cost_per_use: f64,
    pub expires_at_unix_ms: i64,
}

/// A candidate citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Sequential 1-based id within the candidate set.
    pub id: u32,
    pub url: String,
    pub title: String,
    pub source: String,
    pub snippet: String,
    pub credibility: f32,
    pub quality: f32,
}

/// One entry of a placement plan (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub sentence_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_hash: Option<String>,
    pub citation_ids: Vec<u32>,
    pub confidence: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlacementPlan {
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimVerdict {
    Supported,
    Unsupported,
    InsufficientEvidence,
}

/// A pre-verified claim from an upstream verifier (C11.4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimMapping {
    pub claim: String,
    pub verdict: ClaimVerdict,
    pub supporting_citation_ids: Vec<u32>,
    pub confidence: f32,
}

/// Per-agent aggregates used by the bandit selector (C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub success_rate: f64,
    pub run_count: u64,
    pub avg_tokens: f64,
    pub avg_duration_ms: f64,
}

/// P2P mailbox message tag (§3, "P2P Message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTag {
    Request,
    Offer,
    Accept,
    Delegation,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PMessage {
    pub seq: u64,
    pub from: String,
    pub to: String,
    pub tag: MessageTag,
    pub payload: IndexMap<String, JsonValue>,
    /// Nanosecond timestamp.
    pub timestamp_ns: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub seq: u64,
    pub topic: String,
    pub payload: IndexMap<String, JsonValue>,
    pub timestamp_ns: i128,
}
