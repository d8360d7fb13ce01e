//! P2P Messaging & Workspace (C14).
//!
//! A KV-backed mailbox per `(workflow, recipient)` and a single shared
//! workspace ledger per workflow, both using the same "incrementing seq +
//! list append + TTL" shape.

use crate::clients::KvStore;
use crate::event_bus::EventPublisher;
use crate::events::AgentEventType;
use crate::policy::{GateOutcome, PolicyGate};
use crate::types::{AgentExecutionInput, MessageTag, P2PMessage, WorkspaceEntry};
use crate::{error::AgentCoreError, types::ContextMap};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

const MAILBOX_TTL: Duration = Duration::from_secs(48 * 60 * 60);
const DEFAULT_FETCH_LIMIT: i64 = 200;

pub struct P2PMessaging {
    kv: Arc<dyn KvStore>,
    policy: Arc<PolicyGate>,
    events: Arc<EventPublisher>,
}

impl P2PMessaging {
    pub fn new(kv: Arc<dyn KvStore>, policy: Arc<PolicyGate>, events: Arc<EventPublisher>) -> Self {
        Self { kv, policy, events }
    }

    fn mbox_seq_key(workflow_id: &str, to: &str) -> String {
        format!("wf:{workflow_id}:mbox:{to}:seq")
    }

    fn mbox_msgs_key(workflow_id: &str, to: &str) -> String {
        format!("wf:{workflow_id}:mbox:{to}:msgs")
    }

    fn workspace_seq_key(workflow_id: &str) -> String {
        format!("wf:{workflow_id}:workspace:seq")
    }

    fn workspace_topic_key(workflow_id: &str, topic: &str) -> String {
        format!("wf:{workflow_id}:workspace:{topic}")
    }

    /// Send a message into `to`'s mailbox for `workflow_id`. Gated by policy
    /// — a denial surfaces as an `AgentCoreError::PolicyEvaluation`-shaped
    /// rejection rather than silently dropping the message.
    pub async fn send(
        &self,
        workflow_id: &str,
        from: &str,
        to: &str,
        tag: MessageTag,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<P2PMessage, AgentCoreError> {
        self.check_send_permission(workflow_id, from, to).await?;

        let seq = self.kv.incr(&Self::mbox_seq_key(workflow_id, to)).await? as u64;
        let timestamp_ns = now_unix_nanos();

        let message = P2PMessage {
            seq,
            from: from.to_string(),
            to: to.to_string(),
            tag,
            payload: payload.into_iter().collect(),
            timestamp_ns,
        };

        let encoded = serde_json::to_vec(&message)?;
        self.kv.rpush(&Self::mbox_msgs_key(workflow_id, to), encoded).await?;
        self.kv.expire(&Self::mbox_seq_key(workflow_id, to), MAILBOX_TTL).await?;
        self.kv.expire(&Self::mbox_msgs_key(workflow_id, to), MAILBOX_TTL).await?;

        self.events.publish(
            workflow_id,
            None,
            AgentEventType::MessageSent,
            from,
            format!("sent {tag:?} to {to}"),
        );
        self.events.publish(
            workflow_id,
            None,
            AgentEventType::MessageReceived,
            to,
            format!("received {tag:?} from {from}"),
        );

        Ok(message)
    }

    async fn check_send_permission(&self, workflow_id: &str, from: &str, to: &str) -> Result<(), AgentCoreError> {
        let input = AgentExecutionInput {
            query: format!("p2p_send:{to}"),
            agent_id: from.to_string(),
            mode: crate::types::ExecutionMode::Simple,
            session_id: workflow_id.to_string(),
            parent_workflow_id: None,
            conversation_history: vec![],
            persona_id: None,
            suggested_tools: vec![],
            tool_parameters: None,
            context: ContextMap::new(),
            model_override: None,
            provider_override: None,
        };

        match self.policy.evaluate(&input, now_unix_ms()).await? {
            GateOutcome::Proceed | GateOutcome::WouldDenyContinue => Ok(()),
            GateOutcome::Denied { reason } => Err(AgentCoreError::PolicyEvaluation { reason }),
            GateOutcome::ApprovalRequired { reason } => Err(AgentCoreError::PolicyEvaluation {
                reason: format!("approval required: {reason}"),
            }),
        }
    }

    /// Fetch the trailing window of `to`'s mailbox, filtered to `seq >
    /// since_seq`. `limit` defaults to 200 when `None`.
    pub async fn fetch(
        &self,
        workflow_id: &str,
        to: &str,
        since_seq: u64,
        limit: Option<i64>,
    ) -> Result<Vec<P2PMessage>, AgentCoreError> {
        let limit = limit.unwrap_or(DEFAULT_FETCH_LIMIT).max(1);
        let raw = self
            .kv
            .lrange(&Self::mbox_msgs_key(workflow_id, to), -limit, -1)
            .await?;

        let mut messages: Vec<P2PMessage> = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_slice::<P2PMessage>(&entry) {
                Ok(m) if m.seq > since_seq => messages.push(m),
                Ok(_) => {}
                Err(e) => log::warn!("p2p: dropping undecodable mailbox entry: {e}"),
            }
        }
        Ok(messages)
    }

    /// Append an entry to the workspace ledger for `topic`, using one
    /// global monotonic seq per workflow (distinct from per-recipient
    /// mailbox seqs).
    pub async fn append_workspace(
        &self,
        workflow_id: &str,
        agent_id: &str,
        topic: &str,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WorkspaceEntry, AgentCoreError> {
        let seq = self.kv.incr(&Self::workspace_seq_key(workflow_id)).await? as u64;
        let entry = WorkspaceEntry {
            seq,
            topic: topic.to_string(),
            payload: payload.into_iter().collect(),
            timestamp_ns: now_unix_nanos(),
        };

        let encoded = serde_json::to_vec(&entry)?;
        self.kv.rpush(&Self::workspace_topic_key(workflow_id, topic), encoded).await?;
        self.kv.expire(&Self::workspace_topic_key(workflow_id, topic), MAILBOX_TTL).await?;
        self.kv.expire(&Self::workspace_seq_key(workflow_id), MAILBOX_TTL).await?;

        self.events.publish(workflow_id, None, AgentEventType::WorkspaceUpdated, agent_id, topic);

        Ok(entry)
    }

    pub async fn fetch_workspace(
        &self,
        workflow_id: &str,
        topic: &str,
        since_seq: u64,
        limit: Option<i64>,
    ) -> Result<Vec<WorkspaceEntry>, AgentCoreError> {
        let limit = limit.unwrap_or(DEFAULT_FETCH_LIMIT).max(1);
        let raw = self
            .kv
            .lrange(&Self::workspace_topic_key(workflow_id, topic), -limit, -1)
            .await?;

        let mut entries: Vec<WorkspaceEntry> = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_slice::<WorkspaceEntry>(&entry) {
                Ok(e) if e.seq > since_seq => entries.push(e),
                Ok(_) => {}
                Err(e) => log::warn!("p2p: dropping undecodable workspace entry: {e}"),
            }
        }
        Ok(entries)
    }
}

fn now_unix_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

fn now_unix_ms() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() * 1000
}
