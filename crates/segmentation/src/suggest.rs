//! Rule suggestion — client for the external text-generation service that
//! turns an operator's free-text description into a candidate rule tree.
//!
//! The suggestion is only a candidate: callers compile it exactly like a
//! hand-written tree and reject it the same way when it is malformed.

use crate::rules::RuleTree;
use async_trait::async_trait;
use campaign_core::config::RuleSuggesterConfig;
use campaign_core::{CampaignError, CampaignResult};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait RuleSuggester: Send + Sync {
    async fn suggest(&self, prompt: &str) -> CampaignResult<RuleTree>;
}

/// HTTP client posting `{"prompt": ...}` and expecting either a bare rule
/// tree or `{"rules": <tree>}` back.
pub struct HttpRuleSuggester {
    client: reqwest::Client,
    url: String,
}

impl HttpRuleSuggester {
    pub fn new(url: impl Into<String>, timeout: Duration) -> CampaignResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CampaignError::Config(format!("rule suggester client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build from config; `None` when no service URL is configured.
    pub fn from_config(config: &RuleSuggesterConfig) -> CampaignResult<Option<Self>> {
        match &config.url {
            Some(url) => {
                info!(url = %url, "Rule suggester enabled");
                Self::new(url.clone(), Duration::from_millis(config.timeout_ms)).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RuleSuggester for HttpRuleSuggester {
    async fn suggest(&self, prompt: &str) -> CampaignResult<RuleTree> {
        debug!(url = %self.url, "Requesting rule suggestion");
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| CampaignError::Suggestion(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CampaignError::Suggestion(format!(
                "service returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CampaignError::Suggestion(format!("invalid response body: {e}")))?;
        parse_suggestion(body)
    }
}

/// Extract the rule tree from a suggestion response body.
pub fn parse_suggestion(body: Value) -> CampaignResult<RuleTree> {
    let tree = match body {
        Value::Object(mut obj) if obj.contains_key("rules") => {
            obj.remove("rules").unwrap_or(Value::Null)
        }
        other => other,
    };
    RuleTree::from_value(tree)
}
