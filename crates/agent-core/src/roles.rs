//! Role/Tool Discovery (C3).
//!
//! One-shot lazy fetch of the allowed-tools-per-role map from the LLM
//! service; falls back to a static map on any failure, with no retries.

use crate::clients::LlmServiceClient;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell as AsyncOnceCell;

const ROLE_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
const GENERALIST_ROLE: &str = "generalist";

fn static_fallback() -> &'static HashMap<String, Vec<String>> {
    static MAP: OnceCell<HashMap<String, Vec<String>>> = OnceCell::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "research".to_string(),
            vec!["web_search".to_string(), "web_fetch".to_string()],
        );
        m.insert(
            "data_analytics".to_string(),
            vec!["calculator".to_string(), "code_executor".to_string()],
        );
        m.insert(
            GENERALIST_ROLE.to_string(),
            vec![
                "web_search".to_string(),
                "web_fetch".to_string(),
                "calculator".to_string(),
            ],
        );
        m
    })
}

pub struct RoleDiscovery {
    llm: Arc<dyn LlmServiceClient>,
    loaded: AsyncOnceCell<HashMap<String, Vec<String>>>,
}

impl RoleDiscovery {
    pub fn new(llm: Arc<dyn LlmServiceClient>) -> Self {
        Self {
            llm,
            loaded: AsyncOnceCell::new(),
        }
    }

    /// Allowed tools for `role` (case-insensitive). Unknown roles fall back
    /// to `generalist`; if `generalist` is itself absent, returns empty.
    pub async fn allowed_tools(&self, role: &str) -> Vec<String> {
        let map = self.roles_map().await;
        let role_lower = role.to_ascii_lowercase();
        map.get(&role_lower)
            .or_else(|| map.get(GENERALIST_ROLE))
            .cloned()
            .unwrap_or_default()
    }

    async fn roles_map(&self) -> &HashMap<String, Vec<String>> {
        self.loaded
            .get_or_init(|| async {
                let fetch = tokio::time::timeout(ROLE_DISCOVERY_TIMEOUT, self.llm.roles());
                match fetch.await {
                    Ok(Ok(roles)) if !roles.is_empty() => roles
                        .into_iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.allowed_tools))
                        .collect(),
                    Ok(Ok(_)) => {
                        log::debug!("role_discovery: service returned empty map, using static fallback");
                        static_fallback().clone()
                    }
                    Ok(Err(e)) => {
                        log::debug!("role_discovery: fetch failed, using static fallback: {e}");
                        static_fallback().clone()
                    }
                    Err(_) => {
                        log::debug!("role_discovery: fetch timed out, using static fallback");
                        static_fallback().clone()
                    }
                }
            })
            .await
    }
}
