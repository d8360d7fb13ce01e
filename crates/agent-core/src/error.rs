//! Structured error type for the agent execution core.
//!
//! Every variant carries typed context and a disposition the runtime cares
//! about: transient errors are retryable, policy/validation outcomes are
//! not (they surface as successful activity invocations with a message
//! instead, per the error handling design).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured, serializable error type for the agent execution core.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentCoreError {
    // --- Policy ---
    #[error("policy evaluation failed: {reason}")]
    PolicyEvaluation { reason: String },

    // --- Transport ---
    #[error("gRPC transport error: {0}")]
    Transport(String),

    #[error("gRPC circuit breaker open for {target}")]
    CircuitOpen { target: String },

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("request to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    // --- Validation ---
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("citation validation failed: {reason}")]
    CitationValidation { reason: String },

    // --- Serialization ---
    #[error("serialization error: {0}")]
    Serialization(String),

    // --- Lookup ---
    #[error("not found: {0}")]
    NotFound(String),

    // --- Generic internal ---
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentCoreError {
    /// Transient failures the durable runtime should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentCoreError::Transport(_)
                | AgentCoreError::CircuitOpen { .. }
                | AgentCoreError::Timeout { .. }
                | AgentCoreError::Http { .. }
        )
    }
}

impl From<anyhow::Error> for AgentCoreError {
    fn from(e: anyhow::Error) -> Self {
        AgentCoreError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for AgentCoreError {
    fn from(e: serde_json::Error) -> Self {
        AgentCoreError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AgentCoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AgentCoreError::Timeout {
                target: e.url().map(|u| u.to_string()).unwrap_or_default(),
                timeout_ms: 0,
            }
        } else {
            AgentCoreError::Http {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        }
    }
}

impl From<tonic::Status> for AgentCoreError {
    fn from(status: tonic::Status) -> Self {
        AgentCoreError::Transport(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(AgentCoreError::Transport("dial failed".into()).is_retryable());
        assert!(AgentCoreError::CircuitOpen {
            target: "agent-service".into()
        }
        .is_retryable());
        assert!(AgentCoreError::Timeout {
            target: "agent-service".into(),
            timeout_ms: 3000
        }
        .is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!AgentCoreError::Validation {
            reason: "bad input".into()
        }
        .is_retryable());
        assert!(!AgentCoreError::PolicyEvaluation {
            reason: "engine down".into()
        }
        .is_retryable());
        assert!(!AgentCoreError::Internal("oops".into()).is_retryable());
    }

    #[test]
    fn from_anyhow_error() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: AgentCoreError = anyhow_err.into();
        assert!(matches!(err, AgentCoreError::Internal(_)));
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ bad json").unwrap_err();
        let err: AgentCoreError = json_err.into();
        assert!(matches!(err, AgentCoreError::Serialization(_)));
    }

    #[test]
    fn agent_core_error_serde_round_trip() {
        let original = AgentCoreError::NotFound("agent-42".to_string());
        let json = serde_json::to_string(&original).expect("serialize");
        let restored: AgentCoreError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(original.to_string(), restored.to_string());
    }

    #[test]
    fn display_messages_are_human_readable() {
        assert_eq!(
            AgentCoreError::CitationValidation {
                reason: "content modified".into()
            }
            .to_string(),
            "citation validation failed: content modified"
        );
    }
}
