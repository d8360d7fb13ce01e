//! Agent Execution Pipeline (C5).
//!
//! The central operation: given an [`AgentExecutionInput`], produce an
//! [`AgentExecutionResult`]. A policy denial is never propagated as an
//! error — it comes back as a successful activity invocation carrying
//! `success=false`. Transport errors ARE propagated so the runtime can
//! retry the activity.

use crate::clients::{
    AgentQueryRequest, AgentServiceClient, AgentToolResult, AgentUpdate, ExecuteTaskRequest,
    LlmServiceClient, ToolSelectRequest,
};
use crate::config::FeatureConfig;
use crate::error::AgentCoreError;
use crate::event_bus::EventPublisher;
use crate::events::AgentEventType;
use crate::metrics::MetricsSink;
use crate::policy::{GateOutcome, PolicyGate};
use crate::pricing;
use crate::sanitize::{rune_truncate, sanitize_tool_params};
use crate::tool_cost::ToolCostCache;
use crate::types::{
    AgentExecutionInput, AgentExecutionResult, ContextValue, ExecutionMode, Persona, ToolExecution,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_TOOL_SELECT_TOOLS: u32 = 3;
const UNARY_TIMEOUT_BUFFER: Duration = Duration::from_secs(30);
const TOOL_OBSERVATION_MAX_CHARS: usize = 2_000;
const FINAL_RESPONSE_MAX_CHARS: usize = 10_000;
const SKIP_TOOL_SELECT_ROLES: &[&str] = &["research", "data_analytics"];

/// Safe body-field allowlist mirrored into `prompt_params` as a fallback for
/// vendor adapters that read flat prompt params instead of structured tool
/// parameters.
const PROMPT_PARAM_ALLOWLIST: &[&str] = &[
    "id", "ids", "page", "page_size", "offset", "limit", "sort", "sort_by", "order", "filter",
    "filters", "query", "category",
];

pub struct AgentExecutionPipeline {
    llm: Arc<dyn LlmServiceClient>,
    agent_service: Arc<dyn AgentServiceClient>,
    policy_gate: Arc<PolicyGate>,
    tool_cost: Arc<ToolCostCache>,
    events: Arc<EventPublisher>,
    metrics: Arc<dyn MetricsSink>,
    config: FeatureConfig,
}

impl AgentExecutionPipeline {
    pub fn new(
        llm: Arc<dyn LlmServiceClient>,
        agent_service: Arc<dyn AgentServiceClient>,
        policy_gate: Arc<PolicyGate>,
        tool_cost: Arc<ToolCostCache>,
        events: Arc<EventPublisher>,
        metrics: Arc<dyn MetricsSink>,
        config: FeatureConfig,
    ) -> Self {
        Self {
            llm,
            agent_service,
            policy_gate,
            tool_cost,
            events,
            metrics,
            config,
        }
    }

    pub async fn execute(
        &self,
        mut input: AgentExecutionInput,
        runtime_workflow_id: &str,
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        let started_at = Instant::now();
        let workflow_key = input.event_workflow_id(runtime_workflow_id).to_string();

        self.events.publish(
            &workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::AgentThinking,
            &input.agent_id,
            "preparing execution",
        );

        let persona_tool_allowlist = self.overlay_persona(&mut input);

        match self
            .policy_gate
            .evaluate(&input, now_unix_ms())
            .await?
        {
            GateOutcome::Proceed => {}
            GateOutcome::Denied { reason } => {
                return Ok(AgentExecutionResult {
                    duration_ms: elapsed_ms(started_at),
                    ..AgentExecutionResult::empty_failure(reason)
                });
            }
            GateOutcome::WouldDenyContinue => {}
            GateOutcome::ApprovalRequired { reason } => {
                return Ok(AgentExecutionResult {
                    duration_ms: elapsed_ms(started_at),
                    ..AgentExecutionResult::empty_failure(format!("approval required: {reason}"))
                });
            }
        }

        let mut tools = self.plan_tools(&input, persona_tool_allowlist.as_deref()).await?;

        let has_tool_parameters = input
            .tool_parameters
            .as_ref()
            .map(|m| !m.is_empty())
            .unwrap_or(false);

        if has_tool_parameters {
            self.validate_tool_parameters(&mut input);
        } else if !tools.is_empty() && self.config.enable_tool_selection {
            let role = input
                .context
                .get("role")
                .and_then(ContextValue::as_str)
                .unwrap_or("");
            if !SKIP_TOOL_SELECT_ROLES.contains(&role) {
                tools = self.select_tools(&input, &workflow_key, tools).await?;
            }
        }

        let can_stream = self.config.enable_agent_streaming
            && tools.is_empty()
            && !has_tool_parameters;

        let outcome = if can_stream {
            match self.run_streaming(&input, &workflow_key, &tools).await {
                Ok(result) => result,
                Err(_) => self.run_unary(&input, &workflow_key, &tools).await?,
            }
        } else {
            self.run_unary(&input, &workflow_key, &tools).await?
        };

        let mut result = outcome;
        result.duration_ms = elapsed_ms(started_at);

        self.events.publish_with_payload(
            &workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::LlmOutput,
            &input.agent_id,
            "execution complete",
            serde_json::json!({
                "tokens_used": result.tokens_used,
                "model": result.model,
                "provider": result.provider,
                "input_tokens": result.input_tokens,
                "output_tokens": result.output_tokens,
                "cost_usd": result.cost_usd,
                "duration_ms": result.duration_ms,
                "response": rune_truncate(&result.response, FINAL_RESPONSE_MAX_CHARS),
            }),
        );
        result.response = rune_truncate(&result.response, FINAL_RESPONSE_MAX_CHARS);

        Ok(result)
    }

    /// Overlays persona system prompt/temperature into context and returns
    /// the persona's advisory tool allowlist, if any (empty intersection
    /// with service-available tools drops the constraint at plan time).
    fn overlay_persona(&self, input: &mut AgentExecutionInput) -> Option<Vec<String>> {
        let persona_id = input.persona_id.clone()?;
        // Host-provided persona registry is out of scope for this crate; a
        // caller wires one in by pre-populating `context["persona"]` before
        // invoking the pipeline. We only read it back out here.
        let persona = input
            .context
            .get("persona")
            .and_then(|v| serde_json::to_value(v).ok())
            .and_then(|v| serde_json::from_value::<Persona>(v).ok())
            .filter(|p| p.id == persona_id)?;

        input
            .context
            .insert("system_prompt".to_string(), ContextValue::Str(persona.system_prompt.clone()));
        input.context.insert(
            "temperature".to_string(),
            ContextValue::Float(persona.temperature as f64),
        );
        input.context.insert(
            "token_budget_tier".to_string(),
            ContextValue::Str(persona.token_budget_tier.clone()),
        );

        if persona.allowed_tools.is_empty() {
            None
        } else {
            Some(persona.allowed_tools)
        }
    }

    async fn plan_tools(
        &self,
        input: &AgentExecutionInput,
        persona_allowlist: Option<&[String]>,
    ) -> Result<Vec<String>, AgentCoreError> {
        let mut tools = input.suggested_tools.clone();

        if tools.iter().any(|t| t == "web_fetch") && !tools.iter().any(|t| t == "web_search") {
            tools.push("web_search".to_string());
        }

        if let Some(allowlist) = persona_allowlist {
            let intersected: Vec<String> = tools
                .iter()
                .filter(|t| allowlist.iter().any(|a| a == *t))
                .cloned()
                .collect();
            if !intersected.is_empty() {
                tools = intersected;
            }
        }

        Ok(tools)
    }

    /// Drops tool parameters that fail their per-tool precondition, then
    /// mirrors the surviving safe fields into `prompt_params` for vendor
    /// adapters that read flat params.
    fn validate_tool_parameters(&self, input: &mut AgentExecutionInput) {
        let Some(params) = input.tool_parameters.as_mut() else {
            return;
        };

        let valid = |tool: &str, value: &serde_json::Value| -> bool {
            match tool {
                "python_executor" => value
                    .get("code")
                    .and_then(|v| v.as_str())
                    .map(|s| !s.trim().is_empty())
                    .unwrap_or(false),
                "code_executor" => {
                    value.get("wasm_path").and_then(|v| v.as_str()).map(|s| !s.is_empty()).unwrap_or(false)
                        || value
                            .get("wasm_base64")
                            .and_then(|v| v.as_str())
                            .map(|s| !s.is_empty())
                            .unwrap_or(false)
                }
                "calculator" => value
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .map(|s| !s.trim().is_empty())
                    .unwrap_or(false),
                _ => true,
            }
        };

        params.retain(|tool, value| {
            let ok = valid(tool, value);
            if !ok {
                log::debug!("pipeline: dropping invalid tool_parameters for {tool}");
            }
            ok
        });

        let mut prompt_params = serde_json::Map::new();
        for value in params.values() {
            let Some(obj) = value.as_object() else { continue };
            for field in PROMPT_PARAM_ALLOWLIST {
                if let Some(v) = obj.get(*field) {
                    if !crate::sanitize::is_secret_key(field) {
                        prompt_params.insert(field.to_string(), v.clone());
                    }
                }
            }
        }
        if !prompt_params.is_empty() {
            input.context.insert(
                "prompt_params".to_string(),
                ContextValue::from(&serde_json::Value::Object(prompt_params)),
            );
        }
    }

    async fn select_tools(
        &self,
        input: &AgentExecutionInput,
        workflow_key: &str,
        allowlist: Vec<String>,
    ) -> Result<Vec<String>, AgentCoreError> {
        let req = ToolSelectRequest {
            task: input.query.clone(),
            context: serde_json::Value::from(&crate::sanitize::sanitize_context(&input.context)),
            exclude_dangerous: true,
            max_tools: MAX_TOOL_SELECT_TOOLS,
            parent_workflow_id: input.parent_workflow_id.clone(),
        };

        let response = match self.llm.tools_select(req).await {
            Ok(r) => r,
            Err(e) => {
                log::debug!("pipeline: tool-select call failed, falling back to suggested tools: {e}");
                return Ok(allowlist);
            }
        };

        let surviving: Vec<String> = response
            .calls
            .into_iter()
            .filter(|c| allowlist.iter().any(|a| a == &c.tool_name))
            .map(|c| {
                self.events.publish(
                    workflow_key,
                    input.parent_workflow_id.as_deref(),
                    AgentEventType::ToolInvoked,
                    &input.agent_id,
                    format!("invoking {}", c.tool_name),
                );
                c.tool_name
            })
            .collect();

        if surviving.is_empty() {
            Ok(allowlist)
        } else {
            Ok(surviving)
        }
    }

    fn build_execute_task_request(
        &self,
        input: &AgentExecutionInput,
        workflow_key: &str,
        tools: &[String],
    ) -> ExecuteTaskRequest {
        let sanitized = crate::sanitize::sanitize_context(&input.context);
        ExecuteTaskRequest {
            workflow_id: workflow_key.to_string(),
            agent_id: input.agent_id.clone(),
            query: input.query.clone(),
            context_json: serde_json::to_string(&sanitized).unwrap_or_default(),
            mode: input.mode,
            session_context_json: None,
            allowed_tools: tools.to_vec(),
            max_iterations: match input.mode {
                ExecutionMode::Simple => 1,
                ExecutionMode::Standard => 5,
                ExecutionMode::Complex => 10,
            },
            timeout_seconds: self.config.agent_timeout_seconds as u32,
            enable_sandbox: tools.iter().any(|t| t == "code_executor" || t == "python_executor"),
            memory_limit_mb: self.config.agent_memory_limit_mb,
            enable_learning: false,
        }
    }

    async fn run_streaming(
        &self,
        input: &AgentExecutionInput,
        workflow_key: &str,
        tools: &[String],
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        let req = self.build_execute_task_request(input, workflow_key, tools);
        let mut stream = self.agent_service.stream_execute_task(req).await?;

        let mut response = String::new();
        let mut partial_buf = String::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut tool_executions: Vec<ToolExecution> = Vec::new();
        let mut tokens_used: u64 = 0;
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;
        let mut cost_usd_reported: Option<f64> = None;
        let mut model: Option<String> = None;
        let mut provider: Option<String> = None;
        let mut success = true;

        let flush_threshold = self.config.partial_publish_chars.max(1);

        loop {
            let next = stream.next().await;
            let update = match next {
                None => break,
                Some(Ok(u)) => u,
                Some(Err(e)) => {
                    self.events.publish(
                        workflow_key,
                        input.parent_workflow_id.as_deref(),
                        AgentEventType::LlmPartial,
                        &input.agent_id,
                        std::mem::take(&mut partial_buf),
                    );
                    return Err(e);
                }
            };

            match update {
                AgentUpdate::TextDelta(delta) => {
                    response.push_str(&delta);
                    partial_buf.push_str(&delta);
                    if partial_buf.chars().count() >= flush_threshold {
                        self.events.publish(
                            workflow_key,
                            input.parent_workflow_id.as_deref(),
                            AgentEventType::LlmPartial,
                            &input.agent_id,
                            std::mem::take(&mut partial_buf),
                        );
                    }
                }
                AgentUpdate::UsageMetrics(usage) => {
                    if let Some(p) = usage.prompt_tokens {
                        input_tokens = p as u64;
                    }
                    if let Some(c) = usage.completion_tokens {
                        output_tokens = c as u64;
                    }
                    if let Some(t) = usage.total_tokens {
                        tokens_used = t as u64;
                    }
                    cost_usd_reported = usage.cost_usd;
                    model = usage.model.or(model);
                    provider = usage.provider.or(provider);
                }
                AgentUpdate::ToolResult(tool_result) => {
                    self.publish_tool_observation(workflow_key, input, &tool_result);
                    if !tools_used.iter().any(|t| t == &tool_result.tool_name) {
                        tools_used.push(tool_result.tool_name.clone());
                    }
                    tool_executions.push(ToolExecution {
                        tool_name: tool_result.tool_name,
                        success: tool_result.success,
                        output: rune_truncate(&tool_result.output, TOOL_OBSERVATION_MAX_CHARS),
                        error: tool_result.error,
                    });
                }
                AgentUpdate::FinalMessage(message) => {
                    response = message;
                }
                AgentUpdate::State(state) => {
                    if state == crate::clients::AgentState::Failed {
                        success = false;
                    }
                }
            }
        }

        if !partial_buf.is_empty() {
            self.events.publish(
                workflow_key,
                input.parent_workflow_id.as_deref(),
                AgentEventType::LlmPartial,
                &input.agent_id,
                partial_buf,
            );
        }

        tokens_used = total_tokens_used(input_tokens, output_tokens, tokens_used);

        let (provider, model) = self.resolve_provider_model(input, provider, model);
        let cost_usd = self
            .compute_cost(cost_usd_reported, input_tokens, output_tokens, tokens_used, &model, &mut tokens_used, &tools_used)
            .await;

        Ok(AgentExecutionResult {
            response,
            tokens_used,
            input_tokens,
            output_tokens,
            model,
            provider,
            duration_ms: 0,
            success,
            error: None,
            tools_used,
            tool_executions,
            cost_usd,
        })
    }

    async fn run_unary(
        &self,
        input: &AgentExecutionInput,
        workflow_key: &str,
        tools: &[String],
    ) -> Result<AgentExecutionResult, AgentCoreError> {
        let timeout = self.config.agent_timeout() + UNARY_TIMEOUT_BUFFER;
        let req = self.build_execute_task_request(input, workflow_key, tools);

        let response = tokio::time::timeout(timeout, self.agent_service.execute_task(req))
            .await
            .map_err(|_| AgentCoreError::Timeout {
                target: "agent-service".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        let mut tokens_used = total_tokens_used(response.input_tokens, response.output_tokens, response.total_tokens);
        let (provider, model) = self.resolve_provider_model(input, response.provider, response.model);
        let mut tools_used = tools.to_vec();
        tools_used.dedup();

        let cost_usd = self
            .compute_cost(
                Some(response.cost_usd).filter(|c| *c > 0.0),
                response.input_tokens,
                response.output_tokens,
                tokens_used,
                &model,
                &mut tokens_used,
                &tools_used,
            )
            .await;

        Ok(AgentExecutionResult {
            response: response.response,
            tokens_used,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            model,
            provider,
            duration_ms: 0,
            success: response.success,
            error: response.error,
            tools_used,
            tool_executions: Vec::new(),
            cost_usd,
        })
    }

    fn publish_tool_observation(
        &self,
        workflow_key: &str,
        input: &AgentExecutionInput,
        tool_result: &AgentToolResult,
    ) {
        self.events.publish_with_payload(
            workflow_key,
            input.parent_workflow_id.as_deref(),
            AgentEventType::ToolObservation,
            &input.agent_id,
            rune_truncate(&tool_result.output, TOOL_OBSERVATION_MAX_CHARS),
            serde_json::json!({
                "tool_name": tool_result.tool_name,
                "success": tool_result.success,
            }),
        );
    }

    fn resolve_provider_model(
        &self,
        input: &AgentExecutionInput,
        provider: Option<String>,
        model: Option<String>,
    ) -> (Option<String>, Option<String>) {
        let provider = provider
            .filter(|p| !p.is_empty())
            .or_else(|| input.provider_override.as_ref().map(|p| p.trim().to_ascii_lowercase()))
            .filter(|p| !p.is_empty());
        let model = model
            .filter(|m| !m.is_empty())
            .or_else(|| input.model_override.clone())
            .filter(|m| !m.is_empty());
        (provider, model)
    }

    /// Cost accounting per §4.4.4: provider-reported first, then the pricing
    /// table, plus per-tool cost and the MCP cost-to-token bump.
    async fn compute_cost(
        &self,
        cost_usd_reported: Option<f64>,
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
        model: &Option<String>,
        tokens_used: &mut u64,
        tools_used: &[String],
    ) -> f64 {
        let llm_cost = cost_usd_reported.unwrap_or_else(|| {
            if input_tokens > 0 || output_tokens > 0 {
                pricing::estimate_split(model.as_deref(), input_tokens, output_tokens)
            } else if total_tokens > 0 {
                pricing::estimate_total(model.as_deref(), total_tokens)
            } else {
                0.0
            }
        });

        let tool_cost_usd = self.tool_cost.total_cost(tools_used).await;

        if self.config.mcp_cost_to_tokens > 0.0 && tool_cost_usd > 0.0 {
            let bump = (tool_cost_usd * self.config.mcp_cost_to_tokens).round() as u64;
            *tokens_used += bump;
        }

        llm_cost + tool_cost_usd
    }
}

/// §8.1 "Token arithmetic": prefer the prompt+completion sum when both are
/// reported, falling back to the provider's reported total, then zero.
fn total_tokens_used(input_tokens: u64, output_tokens: u64, reported_total: u64) -> u64 {
    if input_tokens > 0 && output_tokens > 0 {
        input_tokens + output_tokens
    } else if reported_total > 0 {
        reported_total
    } else {
        0
    }
}

fn now_unix_ms() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp() * 1000
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Used only to satisfy `AgentQueryRequest`'s shape where the forced-tool
/// path (C6) needs it; re-exported so callers don't need to import clients
/// directly when wiring both components together.
pub type ForcedToolRequest = AgentQueryRequest;
