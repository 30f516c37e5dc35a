use serde::Deserialize;

/// Root application configuration. Loaded from an optional
/// `config/campaign-messenger.toml` file, then environment variables with
/// the prefix `CAMPAIGN_MESSENGER__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub segments: SegmentConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub customers: CustomerStoreConfig,
    #[serde(default)]
    pub rule_suggester: RuleSuggesterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

// ─── Segment Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentConfig {
    /// Reject rule trees containing leaves that do not fit the operator
    /// table instead of dropping them.
    #[serde(default)]
    pub strict_rules: bool,
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,
    #[serde(default = "default_preview_sample_size")]
    pub preview_sample_size: usize,
}

fn default_max_rule_depth() -> usize { 32 }
fn default_preview_sample_size() -> usize { 10 }

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            strict_rules: false,
            max_rule_depth: default_max_rule_depth(),
            preview_sample_size: default_preview_sample_size(),
        }
    }
}

// ─── Dispatch Config ────────────────────────────────────────────────────────

/// Which message states count as "processed" when deciding whether a
/// campaign has finished sending.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Only delivered, failed and bounced messages count.
    #[default]
    AwaitReceipts,
    /// Messages accepted by the provider (`sent`) count as well.
    AcceptedCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
}

fn default_max_concurrent_sends() -> usize { 16 }
fn default_send_timeout_ms() -> u64 { 5000 }
fn default_receipt_timeout_secs() -> u64 { 86_400 }
fn default_sweep_interval_secs() -> u64 { 60 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            send_timeout_ms: default_send_timeout_ms(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            completion_policy: CompletionPolicy::default(),
        }
    }
}

// ─── Provider Config ────────────────────────────────────────────────────────

/// Settings for the simulated delivery vendor.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    #[serde(default = "default_bounce_rate")]
    pub bounce_rate: f64,
    #[serde(default = "default_receipt_delay_ms")]
    pub receipt_delay_ms: u64,
}

fn default_failure_rate() -> f64 { 0.1 }
fn default_bounce_rate() -> f64 { 0.05 }
fn default_receipt_delay_ms() -> u64 { 500 }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            bounce_rate: default_bounce_rate(),
            receipt_delay_ms: default_receipt_delay_ms(),
        }
    }
}

// ─── Customer Store Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerStoreConfig {
    /// JSON file holding an array of customers to preload.
    #[serde(default)]
    pub seed_path: Option<String>,
}

// ─── Rule Suggester Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSuggesterConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_suggester_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_suggester_timeout_ms() -> u64 { 10_000 }

impl Default for RuleSuggesterConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_suggester_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            segments: SegmentConfig::default(),
            dispatch: DispatchConfig::default(),
            provider: ProviderConfig::default(),
            customers: CustomerStoreConfig::default(),
            rule_suggester: RuleSuggesterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/campaign-messenger").required(false))
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_MESSENGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.segments.preview_sample_size, 10);
        assert!(!config.segments.strict_rules);
        assert_eq!(config.dispatch.completion_policy, CompletionPolicy::AwaitReceipts);
        assert!(config.rule_suggester.url.is_none());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "dispatch": { "max_concurrent_sends": 4, "completion_policy": "accepted_counts" },
            "segments": { "strict_rules": true }
        }))
        .unwrap();
        assert_eq!(config.dispatch.max_concurrent_sends, 4);
        assert_eq!(config.dispatch.send_timeout_ms, 5000);
        assert_eq!(config.dispatch.completion_policy, CompletionPolicy::AcceptedCounts);
        assert!(config.segments.strict_rules);
        assert_eq!(config.segments.max_rule_depth, 32);
    }
}
