//! Config/Feature Loader (C15).
//!
//! Loads a feature file on activity entry and materializes an immutable
//! snapshot with typed defaults (thresholds, concurrency caps, timeouts,
//! toggles). Environment variables override specific fields. The snapshot
//! is handed back to the workflow once so the workflow itself stays
//! deterministic.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LLM_SERVICE_URL: &str = "http://llm-service:8000";
pub const DEFAULT_AGENT_CORE_ADDR: &str = "agent-core:50051";
pub const DEFAULT_AGENT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_AGENT_MEMORY_LIMIT_MB: u32 = 256;
pub const DEFAULT_MCP_COST_TO_TOKENS: f64 = 0.0;
pub const DEFAULT_TOOL_COST_TTL_SECONDS: u64 = 300;
pub const DEFAULT_ENABLE_TOOL_SELECTION: bool = true;
pub const DEFAULT_ENABLE_AGENT_STREAMING: bool = true;
pub const DEFAULT_PARTIAL_PUBLISH_CHARS: usize = 1;
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_APPROVAL_ENABLED: bool = false;
pub const DEFAULT_APPROVAL_COMPLEXITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_TEMPLATE_FALLBACK_ENABLED: bool = true;

fn default_llm_service_url() -> String {
    DEFAULT_LLM_SERVICE_URL.to_string()
}
fn default_agent_core_addr() -> String {
    DEFAULT_AGENT_CORE_ADDR.to_string()
}
fn default_agent_timeout_seconds() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECONDS
}
fn default_agent_memory_limit_mb() -> u32 {
    DEFAULT_AGENT_MEMORY_LIMIT_MB
}
fn default_mcp_cost_to_tokens() -> f64 {
    DEFAULT_MCP_COST_TO_TOKENS
}
fn default_tool_cost_ttl_seconds() -> u64 {
    DEFAULT_TOOL_COST_TTL_SECONDS
}
fn default_enable_tool_selection() -> bool {
    DEFAULT_ENABLE_TOOL_SELECTION
}
fn default_enable_agent_streaming() -> bool {
    DEFAULT_ENABLE_AGENT_STREAMING
}
fn default_partial_publish_chars() -> usize {
    DEFAULT_PARTIAL_PUBLISH_CHARS
}
fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}
fn default_approval_enabled() -> bool {
    DEFAULT_APPROVAL_ENABLED
}
fn default_approval_complexity_threshold() -> f64 {
    DEFAULT_APPROVAL_COMPLEXITY_THRESHOLD
}
fn default_template_fallback_enabled() -> bool {
    DEFAULT_TEMPLATE_FALLBACK_ENABLED
}

/// Immutable snapshot of runtime feature configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    #[serde(default = "default_llm_service_url")]
    pub llm_service_url: String,
    #[serde(default = "default_agent_core_addr")]
    pub agent_core_addr: String,
    #[serde(default = "default_agent_timeout_seconds")]
    pub agent_timeout_seconds: u64,
    #[serde(default = "default_agent_memory_limit_mb")]
    pub agent_memory_limit_mb: u32,
    #[serde(default = "default_mcp_cost_to_tokens")]
    pub mcp_cost_to_tokens: f64,
    #[serde(default = "default_tool_cost_ttl_seconds")]
    pub tool_cost_ttl_seconds: u64,
    #[serde(default = "default_enable_tool_selection")]
    pub enable_tool_selection: bool,
    #[serde(default = "default_enable_agent_streaming")]
    pub enable_agent_streaming: bool,
    #[serde(default = "default_partial_publish_chars")]
    pub partial_publish_chars: usize,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_approval_enabled")]
    pub approval_enabled: bool,
    #[serde(default = "default_approval_complexity_threshold")]
    pub approval_complexity_threshold: f64,
    #[serde(default = "default_template_fallback_enabled")]
    pub template_fallback_enabled: bool,
    #[serde(default)]
    pub synthesis_templates_dir: Option<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            llm_service_url: default_llm_service_url(),
            agent_core_addr: default_agent_core_addr(),
            agent_timeout_seconds: default_agent_timeout_seconds(),
            agent_memory_limit_mb: default_agent_memory_limit_mb(),
            mcp_cost_to_tokens: default_mcp_cost_to_tokens(),
            tool_cost_ttl_seconds: default_tool_cost_ttl_seconds(),
            enable_tool_selection: default_enable_tool_selection(),
            enable_agent_streaming: default_enable_agent_streaming(),
            partial_publish_chars: default_partial_publish_chars(),
            environment: default_environment(),
            approval_enabled: default_approval_enabled(),
            approval_complexity_threshold: default_approval_complexity_threshold(),
            template_fallback_enabled: default_template_fallback_enabled(),
            synthesis_templates_dir: None,
        }
    }
}

impl FeatureConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_seconds)
    }

    pub fn tool_cost_ttl(&self) -> Duration {
        Duration::from_secs(self.tool_cost_ttl_seconds.max(1))
    }

    /// Load from `CONFIG_PATH` (TOML, optional) then apply environment
    /// variable overrides. Never errors: a missing or unparsable file falls
    /// back to defaults, matching the "best-effort, never block startup"
    /// posture of the rest of this crate's caches.
    pub fn load() -> Self {
        let mut cfg = Self::from_file_or_default();
        cfg.apply_env_overrides();
        cfg
    }

    fn from_file_or_default() -> Self {
        let path = env::var("CONFIG_PATH").ok();
        let Some(path) = path else {
            return Self::default();
        };
        if !Path::new(&path).exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("failed to parse CONFIG_PATH={path}: {e}");
                Self::default()
            }),
            Err(e) => {
                log::warn!("failed to read CONFIG_PATH={path}: {e}");
                Self::default()
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("LLM_SERVICE_URL") {
            self.llm_service_url = v;
        }
        if let Ok(v) = env::var("AGENT_CORE_ADDR") {
            self.agent_core_addr = v;
        }
        if let Some(v) = env_parsed::<u64>("AGENT_TIMEOUT_SECONDS") {
            self.agent_timeout_seconds = v;
        }
        if let Some(v) = env_parsed::<u32>("AGENT_MEMORY_LIMIT_MB") {
            self.agent_memory_limit_mb = v;
        }
        if let Some(v) = env_parsed::<f64>("MCP_COST_TO_TOKENS") {
            self.mcp_cost_to_tokens = v;
        }
        if let Some(v) = env_parsed::<u64>("MCP_TOOL_COST_TTL_SECONDS") {
            self.tool_cost_ttl_seconds = v.max(1);
        }
        if let Some(v) = env_bool("ENABLE_TOOL_SELECTION") {
            self.enable_tool_selection = v;
        }
        if let Some(v) = env_bool("ENABLE_AGENT_STREAMING") {
            self.enable_agent_streaming = v;
        }
        if let Some(v) = env_parsed::<usize>("PARTIAL_PUBLISH_CHARS") {
            self.partial_publish_chars = v;
        }
        if let Ok(v) = env::var("ENVIRONMENT") {
            self.environment = v;
        }
        if let Some(v) = env_bool("APPROVAL_ENABLED") {
            self.approval_enabled = v;
        }
        if let Some(v) = env_parsed::<f64>("APPROVAL_COMPLEXITY_THRESHOLD") {
            self.approval_complexity_threshold = v;
        }
        if let Some(v) = env_bool("TEMPLATE_FALLBACK_ENABLED") {
            self.template_fallback_enabled = v;
        }
        if let Ok(v) = env::var("SYNTHESIS_TEMPLATES_DIR") {
            self.synthesis_templates_dir = Some(v);
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| match v.trim() {
        "1" | "true" | "TRUE" | "True" => Some(true),
        "0" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    })
}
