use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::ShadowPolicy;
use crate::resilience::{BreakerConfig, RetryPolicy};
use crate::rules::RedactionPattern;
use crate::sinks::{CollectorSettings, SearchIndexSettings};
use crate::telemetry::AlertSettings;

/// Environment variable prefix; nested keys are separated by `__`,
/// e.g. `POLICYGATE__SHADOW__ENABLED=true`.
pub const ENV_PREFIX: &str = "POLICYGATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{sink} is enabled but {missing} is not configured")]
    MissingCredential { sink: &'static str, missing: &'static str },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Shared credential for decision and admin calls
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
}

fn default_max_text_bytes() -> usize {
    64 * 1024
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            api_key: String::new(),
            max_text_bytes: default_max_text_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_policy_path")]
    pub path: PathBuf,
    /// Policy reload check interval in seconds
    #[serde(default = "default_reload_secs")]
    pub reload_secs: u64,
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("policy.yaml")
}

fn default_reload_secs() -> u64 {
    30
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings {
            path: default_policy_path(),
            reload_secs: default_reload_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShadowSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub overrides: Vec<String>,
}

impl ShadowSettings {
    pub fn to_policy(&self) -> ShadowPolicy {
        ShadowPolicy {
            enabled: self.enabled,
            overrides: self.overrides.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    /// Characters of redacted text kept in each record
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("data/audit.jsonl")
}

fn default_excerpt_chars() -> usize {
    200
}

impl Default for AuditSettings {
    fn default() -> Self {
        AuditSettings {
            path: default_audit_path(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_ratio() -> f64 {
    0.5
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeadLetterSettings {
    /// Directory for per-target dead-letter files; in-memory when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSinkSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub file: FileSinkSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub search: SearchIndexSettings,
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            flush_interval_ms: default_flush_interval_ms(),
            file: FileSinkSettings::default(),
            collector: CollectorSettings::default(),
            search: SearchIndexSettings::default(),
        }
    }
}

impl TelemetrySettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Full gateway configuration, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub policy: PolicySettings,
    #[serde(default)]
    pub shadow: ShadowSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub dead_letter: DeadLetterSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub redaction: Vec<RedactionPattern>,
}

impl Settings {
    /// Load from an optional file, then the process environment, and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Settings::load_with_env(path, None)
    }

    /// Like `load`, reading environment values from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("shadow.overrides")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fail fast on configurations that would run without a required
    /// credential or with thresholds that disable a safeguard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                sink: "decision API",
                missing: "api.api_key",
            });
        }
        if self.api.max_text_bytes == 0 {
            return Err(ConfigError::Invalid("api.max_text_bytes must be positive".to_string()));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid("breaker thresholds must be positive".to_string()));
        }
        if self.breaker.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("breaker.call_timeout_ms must be positive".to_string()));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid("retry.max_retries must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::Invalid("retry.jitter_ratio must be within 0.0..=1.0".to_string()));
        }
        if self.telemetry.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("telemetry.flush_interval_ms must be positive".to_string()));
        }

        let file = &self.telemetry.file;
        if file.enabled && file.path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("telemetry.file is enabled without a path".to_string()));
        }

        let collector = &self.telemetry.collector;
        if collector.enabled {
            if collector.endpoint.is_empty() {
                return Err(ConfigError::Invalid("telemetry.collector is enabled without an endpoint".to_string()));
            }
            if !collector.has_credentials() {
                return Err(ConfigError::MissingCredential {
                    sink: "telemetry.collector",
                    missing: "a token or username/password",
                });
            }
        }

        let search = &self.telemetry.search;
        if search.enabled {
            if search.endpoint.is_empty() {
                return Err(ConfigError::Invalid("telemetry.search is enabled without an endpoint".to_string()));
            }
            if !search.has_credentials() {
                return Err(ConfigError::MissingCredential {
                    sink: "telemetry.search",
                    missing: "username/password",
                });
            }
        }

        if self.alerts.enabled && self.alerts.webhook_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingCredential {
                sink: "alerts",
                missing: "alerts.webhook_url",
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_defaults_need_api_key() {
        let result = Settings::load_with_env(None, env(&[]));

        assert!(matches!(
            result,
            Err(ConfigError::MissingCredential { missing: "api.api_key", .. })
        ));
    }

    #[test]
    fn test_file_values_with_defaults() {
        let file = yaml_file(
            r#"
api:
  api_key: file-key
shadow:
  enabled: true
  overrides: [R1, R9]
breaker:
  failure_threshold: 2
redaction:
  - name: ssn
    pattern: '\d{3}-\d{2}-\d{4}'
"#,
        );

        let settings = Settings::load_with_env(Some(file.path()), env(&[])).unwrap();

        assert_eq!(settings.api.api_key, "file-key");
        assert!(settings.shadow.enabled);
        assert_eq!(settings.shadow.overrides, vec!["R1", "R9"]);
        assert_eq!(settings.breaker.failure_threshold, 2);
        assert_eq!(settings.breaker.success_threshold, 2);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.redaction[0].name, "ssn");
        assert_eq!(settings.audit.excerpt_chars, 200);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = yaml_file(
            r#"
api:
  api_key: file-key
shadow:
  enabled: false
"#,
        );

        let settings = Settings::load_with_env(
            Some(file.path()),
            env(&[
                ("POLICYGATE__API__API_KEY", "env-key"),
                ("POLICYGATE__SHADOW__ENABLED", "true"),
                ("POLICYGATE__SHADOW__OVERRIDES", "R1,R2"),
                ("POLICYGATE__RETRY__MAX_RETRIES", "7"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.api.api_key, "env-key");
        assert!(settings.shadow.enabled);
        assert_eq!(settings.shadow.overrides, vec!["R1", "R2"]);
        assert_eq!(settings.retry.max_retries, 7);

        let shadow = settings.shadow.to_policy();
        assert!(shadow.overrides.contains("R2"));
    }

    #[test]
    fn test_enabled_collector_requires_credentials() {
        let result = Settings::load_with_env(
            None,
            env(&[
                ("POLICYGATE__API__API_KEY", "k"),
                ("POLICYGATE__TELEMETRY__COLLECTOR__ENABLED", "true"),
                ("POLICYGATE__TELEMETRY__COLLECTOR__ENDPOINT", "https://collector.example/services/collector"),
            ]),
        );

        assert!(matches!(
            result,
            Err(ConfigError::MissingCredential { sink: "telemetry.collector", .. })
        ));
    }

    #[test]
    fn test_enabled_search_requires_basic_auth() {
        let mut settings = Settings::default();
        settings.api.api_key = "k".to_string();
        settings.telemetry.search = SearchIndexSettings {
            enabled: true,
            endpoint: "https://search.example".to_string(),
            username: Some("elastic".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingCredential { sink: "telemetry.search", .. })
        ));

        settings.telemetry.search.password = Some("pw".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_alerts_need_webhook_and_thresholds_positive() {
        let mut settings = Settings::default();
        settings.api.api_key = "k".to_string();
        settings.alerts.enabled = true;

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingCredential { sink: "alerts", .. })
        ));

        settings.alerts.webhook_url = Some("https://hooks.example/alert".to_string());
        settings.breaker.failure_threshold = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duration_helpers() {
        let settings = Settings::default();

        assert_eq!(settings.breaker.to_config().recovery_timeout, Duration::from_secs(30));
        assert_eq!(settings.retry.to_policy().base_delay, Duration::from_millis(200));
        assert_eq!(settings.telemetry.flush_interval(), Duration::from_secs(5));
    }
}
