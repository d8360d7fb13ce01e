//! Commonly-used types for consumers of this crate.

pub use crate::activities::Activities;
pub use crate::citation::{CitationEngine, CitationResult, ProtocolUsed};
pub use crate::clients::{
    AgentQueryRequest, AgentQueryResponse, AgentServiceClient, AgentUpdate, EmbeddingService,
    KvStore, LlmServiceClient, PolicyEngine, RelationalStore, VectorStore,
};
pub use crate::config::FeatureConfig;
pub use crate::error::AgentCoreError;
pub use crate::event_bus::EventPublisher;
pub use crate::events::{AgentCoreEvent, AgentEventType, EventObserver};
pub use crate::forced_tool::ForcedToolPath;
pub use crate::hash::Hash6;
pub use crate::p2p::P2PMessaging;
pub use crate::pipeline::AgentExecutionPipeline;
pub use crate::policy::{GateOutcome, PolicyGate};
pub use crate::query_recorder::QueryRecorder;
pub use crate::research_refiner::{ResearchPlan, ResearchRefiner};
pub use crate::roles::RoleDiscovery;
pub use crate::selection::{epsilon_greedy, ucb1};
pub use crate::semantic_memory::{MemoryItem, SemanticMemoryFetch};
pub use crate::subquery::{Subquery, SubqueryGenInput, SubqueryGenerator};
pub use crate::tool_cost::ToolCostCache;
pub use crate::types::{
    AgentExecutionInput, AgentExecutionResult, AgentPerformance, Citation, ContextValue, Persona,
    PolicyDecision, PolicyInput, PolicyMode,
};
