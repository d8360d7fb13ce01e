//! Tool Cost Cache (C2).
//!
//! Best-effort TTL cache of per-tool USD cost for budget accounting.
//! Failures degrade gracefully to zero cost — never an error.

use crate::clients::LlmServiceClient;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

const TOOL_METADATA_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ToolCostCache {
    llm: Arc<dyn LlmServiceClient>,
    cache: Cache<String, f64>,
    ttl: Duration,
}

impl ToolCostCache {
    pub fn new(llm: Arc<dyn LlmServiceClient>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() {
            Duration::from_secs(crate::config::DEFAULT_TOOL_COST_TTL_SECONDS)
        } else {
            ttl
        };
        Self {
            llm,
            cache: Cache::builder().time_to_live(ttl).build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached/freshly-fetched per-use cost, or `0.0` on any
    /// failure (non-2xx, decode error, or a reported cost `<= 0`). A zero
    /// result is never cached so the next call retries the fetch.
    pub async fn get(&self, tool: &str) -> f64 {
        if let Some(cost) = self.cache.get(tool).await {
            return cost;
        }

        let fetch = tokio::time::timeout(TOOL_METADATA_TIMEOUT, self.llm.tool_metadata(tool));
        let cost = match fetch.await {
            Ok(Ok(metadata)) if metadata.cost_per_use > 0.0 => metadata.cost_per_use,
            Ok(Ok(_)) => {
                log::debug!("tool_cost: {tool} reported cost <= 0, not caching");
                0.0
            }
            Ok(Err(e)) => {
                log::debug!("tool_cost: metadata fetch failed for {tool}: {e}");
                0.0
            }
            Err(_) => {
                log::debug!("tool_cost: metadata fetch timed out for {tool}");
                0.0
            }
        };

        if cost > 0.0 {
            self.cache.insert(tool.to_string(), cost).await;
        }
        cost
    }

    pub async fn total_cost(&self, tools: &[String]) -> f64 {
        let mut total = 0.0;
        for tool in tools {
            total += self.get(tool).await;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentCoreError;
    use crate::test_support::{FakeLlmService, FakeLlmServiceBuilder};
    use async_trait::async_trait;

    struct FailingLlm;

    #[async_trait]
    impl LlmServiceClient for FailingLlm {
        async fn agent_query(
            &self,
            _req: crate::clients::AgentQueryRequest,
        ) -> Result<crate::clients::AgentQueryResponse, AgentCoreError> {
            unimplemented!()
        }
        async fn tools_list(&self, _exclude_dangerous: bool) -> Result<Vec<String>, AgentCoreError> {
            unimplemented!()
        }
        async fn tools_select(
            &self,
            _req: crate::clients::ToolSelectRequest,
        ) -> Result<crate::clients::ToolSelectResponse, AgentCoreError> {
            unimplemented!()
        }
        async fn tool_metadata(
            &self,
            _tool: &str,
        ) -> Result<crate::clients::ToolMetadata, AgentCoreError> {
            Err(AgentCoreError::Http {
                url: "x".into(),
                reason: "boom".into(),
            })
        }
        async fn roles(
            &self,
        ) -> Result<std::collections::HashMap<String, crate::clients::RoleInfo>, AgentCoreError>
        {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn caches_positive_cost() {
        let llm: Arc<dyn LlmServiceClient> = Arc::new(
            FakeLlmServiceBuilder::new()
                .with_tool_cost("calculator", 0.01)
                .build(),
        );
        let cache = ToolCostCache::new(llm, Duration::from_secs(60));
        assert_eq!(cache.get("calculator").await, 0.01);
        assert_eq!(cache.get("calculator").await, 0.01);
    }

    #[tokio::test]
    async fn non_positive_cost_is_not_cached_and_reports_zero() {
        let llm: Arc<dyn LlmServiceClient> = Arc::new(
            FakeLlmServiceBuilder::new()
                .with_tool_cost("free_tool", 0.0)
                .build(),
        );
        let cache = ToolCostCache::new(llm, Duration::from_secs(60));
        assert_eq!(cache.get("free_tool").await, 0.0);
    }

    #[tokio::test]
    async fn failure_degrades_to_zero() {
        let llm: Arc<dyn LlmServiceClient> = Arc::new(FailingLlm);
        let cache = ToolCostCache::new(llm, Duration::from_secs(60));
        assert_eq!(cache.get("anything").await, 0.0);
    }

    #[tokio::test]
    async fn total_cost_sums_tools() {
        let llm: Arc<dyn LlmServiceClient> = Arc::new(
            FakeLlmServiceBuilder::new()
                .with_tool_cost("a", 0.1)
                .with_tool_cost("b", 0.2)
                .build(),
        );
        let cache = ToolCostCache::new(llm, Duration::from_secs(60));
        let total = cache.total_cost(&["a".to_string(), "b".to_string()]).await;
        assert!((total - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_ttl_falls_back_to_default() {
        let llm: Arc<dyn LlmServiceClient> = Arc::new(FakeLlmService::default());
        let cache = ToolCostCache::new(llm, Duration::from_secs(0));
        assert_eq!(cache.ttl().as_secs(), crate::config::DEFAULT_TOOL_COST_TTL_SECONDS);
    }
}
