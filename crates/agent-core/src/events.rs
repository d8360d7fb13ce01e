//! The typed event taxonomy published by the event publisher (C13).
//!
//! Every event carries `(workflow_id, type, agent_id, message, timestamp)`
//! plus an optional structured payload. Consumers sort by arrival, not by
//! timestamp, so `seq` (assigned by the publisher) is the ordering key that
//! matters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentCoreError;

/// The nine event kinds in the event taxonomy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEventType {
    AgentThinking,
    ToolInvoked,
    ToolObservation,
    LlmPrompt,
    LlmPartial,
    LlmOutput,
    MessageSent,
    MessageReceived,
    WorkspaceUpdated,
}

/// A single published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCoreEvent {
    /// Publisher-assigned monotonic sequence number (arrival order).
    pub seq: u64,
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    pub agent_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Unix millis.
    pub timestamp: i64,
}

impl AgentCoreEvent {
    pub fn new(
        workflow_id: impl Into<String>,
        event_type: AgentEventType,
        agent_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            workflow_id: workflow_id.into(),
            event_type,
            agent_id: agent_id.into(),
            message: message.into(),
            payload: None,
            timestamp: 0,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Receives published events. The runtime heartbeat channel and the live
/// stream bus are both modeled as observers registered on the same
/// publisher (C13), so a single `publish` call reaches both.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &AgentCoreEvent) -> Result<(), AgentCoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&AgentEventType::LlmPartial).unwrap();
        assert_eq!(json, "\"LLM_PARTIAL\"");
        let json = serde_json::to_string(&AgentEventType::WorkspaceUpdated).unwrap();
        assert_eq!(json, "\"WORKSPACE_UPDATED\"");
    }

    #[test]
    fn event_carries_required_fields() {
        let event = AgentCoreEvent::new("wf-1", AgentEventType::AgentThinking, "agent-a", "thinking");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["workflow_id"], "wf-1");
        assert_eq!(json["type"], "AGENT_THINKING");
        assert_eq!(json["agent_id"], "agent-a");
        assert_eq!(json["message"], "thinking");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn with_payload_attaches_structured_data() {
        let event = AgentCoreEvent::new("wf-1", AgentEventType::ToolInvoked, "agent-a", "calling tool")
            .with_payload(serde_json::json!({"tool": "calculator"}));
        assert_eq!(event.payload.unwrap()["tool"], "calculator");
    }
}
