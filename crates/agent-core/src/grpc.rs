//! gRPC transport for the agent service contract (§6.2).
//!
//! Bridges the generated tonic/prost client against [`AgentServiceClient`],
//! so the pipeline (which only knows the hand-rolled trait and DTOs) can be
//! backed by a real `agent_service.proto` endpoint.

use crate::clients::{
    AgentServiceClient, AgentState as DtoAgentState, AgentToolResult, AgentUpdate as DtoAgentUpdate,
    AgentUpdateStream, ExecuteTaskRequest as DtoExecuteTaskRequest,
    ExecuteTaskResponse as DtoExecuteTaskResponse, UsageMetricsUpdate,
};
use crate::error::AgentCoreError;
use async_trait::async_trait;
use futures::StreamExt;
use tonic::transport::Channel;

#[allow(clippy::all)]
pub mod proto {
    tonic::include_proto!("agent_service");
}

use proto::agent_service_client::AgentServiceClient as GeneratedClient;

pub struct GrpcAgentServiceClient {
    client: GeneratedClient<Channel>,
}

impl GrpcAgentServiceClient {
    pub async fn connect(addr: impl Into<String>) -> Result<Self, AgentCoreError> {
        let client = GeneratedClient::connect(addr.into())
            .await
            .map_err(|e| AgentCoreError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

fn to_proto_mode(mode: crate::types::ExecutionMode) -> i32 {
    match mode {
        crate::types::ExecutionMode::Simple => proto::ExecutionMode::Simple as i32,
        crate::types::ExecutionMode::Standard => proto::ExecutionMode::Standard as i32,
        crate::types::ExecutionMode::Complex => proto::ExecutionMode::Complex as i32,
    }
}

fn to_proto_request(req: DtoExecuteTaskRequest) -> proto::ExecuteTaskRequest {
    proto::ExecuteTaskRequest {
        workflow_id: req.workflow_id,
        agent_id: req.agent_id,
        query: req.query,
        context_json: req.context_json,
        mode: to_proto_mode(req.mode),
        session_context_json: req.session_context_json.unwrap_or_default(),
        allowed_tools: req.allowed_tools,
        agent_config: Some(proto::AgentConfig {
            max_iterations: req.max_iterations,
            timeout_seconds: req.timeout_seconds,
            enable_sandbox: req.enable_sandbox,
            memory_limit_mb: req.memory_limit_mb,
            enable_learning: req.enable_learning,
        }),
    }
}

fn from_proto_response(resp: proto::ExecuteTaskResponse) -> DtoExecuteTaskResponse {
    DtoExecuteTaskResponse {
        success: resp.success,
        response: resp.response,
        model: (!resp.model.is_empty()).then_some(resp.model),
        provider: (!resp.provider.is_empty()).then_some(resp.provider),
        input_tokens: resp.input_tokens,
        output_tokens: resp.output_tokens,
        total_tokens: resp.total_tokens,
        cost_usd: resp.cost_usd,
        error: (!resp.error.is_empty()).then_some(resp.error),
    }
}

/// Best-effort `String -> f64` parse for the wire-level usage-metrics
/// fields, which the proto carries as strings to stay provider-agnostic.
fn parse_metric(s: &str) -> Option<f64> {
    if s.is_empty() {
        None
    } else {
        s.parse().ok()
    }
}

fn from_proto_update(update: proto::AgentUpdate) -> Option<DtoAgentUpdate> {
    match update.payload? {
        proto::agent_update::Payload::TextDelta(text) => Some(DtoAgentUpdate::TextDelta(text)),
        proto::agent_update::Payload::FinalMessage(text) => Some(DtoAgentUpdate::FinalMessage(text)),
        proto::agent_update::Payload::State(state) => {
            let mapped = match proto::AgentState::try_from(state).ok()? {
                proto::AgentState::Running => DtoAgentState::Running,
                proto::AgentState::Completed => DtoAgentState::Completed,
                proto::AgentState::Failed => DtoAgentState::Failed,
                proto::AgentState::Unspecified => return None,
            };
            Some(DtoAgentUpdate::State(mapped))
        }
        proto::agent_update::Payload::ToolResult(result) => {
            if result.is_usage_metrics {
                let metrics = result.usage_metrics.unwrap_or_default();
                Some(DtoAgentUpdate::UsageMetrics(UsageMetricsUpdate {
                    prompt_tokens: parse_metric(&metrics.prompt_tokens),
                    completion_tokens: parse_metric(&metrics.completion_tokens),
                    total_tokens: parse_metric(&metrics.total_tokens),
                    cost_usd: parse_metric(&metrics.cost_usd),
                    model: (!metrics.model.is_empty()).then_some(metrics.model),
                    provider: (!metrics.provider.is_empty()).then_some(metrics.provider),
                }))
            } else {
                Some(DtoAgentUpdate::ToolResult(AgentToolResult {
                    tool_name: result.tool_name,
                    success: result.success,
                    output: result.output,
                    error: (!result.error.is_empty()).then_some(result.error),
                }))
            }
        }
    }
}

#[async_trait]
impl AgentServiceClient for GrpcAgentServiceClient {
    async fn execute_task(&self, req: DtoExecuteTaskRequest) -> Result<DtoExecuteTaskResponse, AgentCoreError> {
        let mut client = self.client.clone();
        let response = client
            .execute_task(to_proto_request(req))
            .await
            .map_err(|e| AgentCoreError::Transport(e.to_string()))?;
        Ok(from_proto_response(response.into_inner()))
    }

    async fn stream_execute_task(&self, req: DtoExecuteTaskRequest) -> Result<AgentUpdateStream, AgentCoreError> {
        let mut client = self.client.clone();
        let response = client
            .stream_execute_task(to_proto_request(req))
            .await
            .map_err(|e| AgentCoreError::Transport(e.to_string()))?;

        let stream = response.into_inner().filter_map(|item| async move {
            match item {
                Ok(update) => from_proto_update(update).map(Ok),
                Err(e) => Some(Err(AgentCoreError::Transport(e.to_string()))),
            }
        });

        Ok(Box::pin(stream))
    }
}
