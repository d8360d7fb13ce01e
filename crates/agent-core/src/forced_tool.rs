//! Forced-Tool Path (C6).
//!
//! Used when execution carries a populated `tool_parameters` alongside
//! `suggested_tools`. Bypasses the agent-service gRPC entirely and calls
//! the LLM service's `/agent/query` directly with a `forced_tool_calls`
//! payload.
//!
//! Exactly one tool is forced per call. When multiple `suggested_tools`
//! are present, the first is selected — the remainder are advisory only
//! on this path (see DESIGN.md for the rationale).

use crate::clients::{AgentQueryRequest, ForcedToolCall, LlmServiceClient};
use crate::event_bus::EventPublisher;
use crate::events::AgentEventType;
use crate::sanitize::sanitize_tool_params;
use crate::tool_cost::ToolCostCache;
use crate::types::{AgentExecutionInput, AgentExecutionResult, ContextMap, ContextValue};
use crate::{error::AgentCoreError, pricing};
use std::sync::Arc;
use std::time::Instant;

pub struct ForcedToolPath {
    llm: Arc<dyn LlmServiceClient>,
    tool_cost: Arc<ToolCostCache>,
    events: Arc<EventPublisher>,
}

impl ForcedToolPath {
    pub fn new(llm: Arc<dyn LlmServiceClient>, tool_cost: Arc<ToolCostCache>, events: Arc<EventPublisher>) -> Self {
        Self { llm, tool_cost, events }
    }

    pub async fn execute(
        &self,
        input: &AgentExecutionInput,
        runtime_workflow_id: &str,
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        let started_at = Instant::now();
        let workflow_key = input.event_workflow_id(runtime_workflow_id).to_string();

        let Some(tool_name) = input.suggested_tools.first().cloned() else {
            return Ok(AgentExecutionResult::empty_failure(
                "forced-tool path requires at least one suggested tool",
            ));
        };

        let raw_params = input
            .tool_parameters
            .as_ref()
            .and_then(|m| m.get(&tool_name))
            .cloned()
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let sanitized_params = sanitize_context_value(&raw_params);

        self.events.publish_with_payload(
            &workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::ToolInvoked,
            &input.agent_id,
            format!("invoking {tool_name} with forced parameters"),
            serde_json::json!({ "tool_name": tool_name, "parameters": sanitized_params }),
        );

        let req = AgentQueryRequest {
            query: input.query.clone(),
            context: serde_json::Value::from(&crate::sanitize::sanitize_context(&input.context)),
            max_tokens: None,
            temperature: None,
            agent_id: input.agent_id.clone(),
            model_tier: None,
            forced_tool_calls: Some(vec![ForcedToolCall {
                tool_name: tool_name.clone(),
                parameters: raw_params,
            }]),
            session_context: None,
        };

        let response = self.llm.agent_query(req).await;

        let duration_ms = started_at.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.events.publish_with_payload(
                    &workflow_key,
                    input.parent_workflow_id.as_deref(),
                    AgentEventType::ToolObservation,
                    &input.agent_id,
                    format!("{tool_name} failed: {e}"),
                    serde_json::json!({ "tool_name": tool_name, "success": false, "duration_ms": duration_ms }),
                );
                return Ok(AgentExecutionResult {
                    duration_ms,
                    ..AgentExecutionResult::empty_failure(e.to_string())
                });
            }
        };

        self.events.publish_with_payload(
            &workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::ToolObservation,
            &input.agent_id,
            "tool call complete",
            serde_json::json!({
                "tool_name": tool_name,
                "success": response.success,
                "duration_ms": duration_ms,
            }),
        );

        let input_tokens = response.metadata.input_tokens.unwrap_or(0);
        let output_tokens = response.metadata.output_tokens.unwrap_or(0);
        let tokens_used = response.tokens_used.unwrap_or(input_tokens + output_tokens);

        let tool_cost = self.tool_cost.get(&tool_name).await;
        let llm_cost = response.metadata.cost_usd.unwrap_or_else(|| {
            if input_tokens > 0 || output_tokens > 0 {
                pricing::estimate_split(response.model_used.as_deref(), input_tokens, output_tokens)
            } else {
                0.0
            }
        });

        let result = AgentExecutionResult {
            response: response.response,
            tokens_used,
            input_tokens,
            output_tokens,
            model: response.model_used,
            provider: response.provider,
            duration_ms,
            success: response.success,
            error: None,
            tools_used: vec![tool_name],
            tool_executions: Vec::new(),
            cost_usd: llm_cost + tool_cost,
        };

        self.events.publish_with_payload(
            &workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::LlmOutput,
            &input.agent_id,
            "forced-tool execution complete",
            serde_json::json!({
                "tokens_used": result.tokens_used,
                "model": result.model,
                "provider": result.provider,
                "cost_usd": result.cost_usd,
                "duration_ms": result.duration_ms,
            }),
        );

        Ok(result)
    }
}

fn sanitize_context_value(value: &serde_json::Value) -> serde_json::Value {
    let map: ContextMap = match value {
        serde_json::Value::Object(_) => {
            let cv = ContextValue::from(value);
            match cv {
                ContextValue::Map(m) => m,
                _ => return value.clone(),
            }
        }
        _ => return value.clone(),
    };
    serde_json::Value::from(&ContextValue::Map(sanitize_tool_params(&map)))
}
