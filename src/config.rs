//! Configuration management for the Party Lookup Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub switch: SwitchConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub cache: CacheConfig,
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub participants: Vec<ParticipantEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// FSP id this connector answers as when no better source is known
    pub fsp_id: String,
    #[serde(default = "default_queue_capacity")]
    pub dispatch_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl SwitchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Invalidate the context when a callback is correlated
    #[serde(default = "default_true")]
    pub consume_on_correlate: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow gateway base URL; commands are only logged when unset
    pub gateway_url: Option<String>,
    pub party_lookup_flow: String,
    pub response_message: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Static directory entry: who owns a party identifier
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParticipantEntry {
    pub id_type: String,
    pub id_value: String,
    pub tenant_id: String,
    pub fsp_id: String,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("PARTY_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.switch.base_url)
            .with_context(|| format!("Invalid switch base_url: {}", self.switch.base_url))?;

        if let Some(gateway) = &self.workflow.gateway_url {
            reqwest::Url::parse(gateway)
                .with_context(|| format!("Invalid workflow gateway_url: {}", gateway))?;
        }

        if self.relayer.fsp_id.is_empty() {
            anyhow::bail!("relayer.fsp_id must be set");
        }

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than zero");
        }

        for entry in &self.participants {
            if entry.id_value.is_empty() || entry.fsp_id.is_empty() {
                anyhow::bail!(
                    "Participant entry {}/{} is incomplete",
                    entry.id_type,
                    entry.id_value
                );
            }
            if entry.id_type.parse::<crate::party::PartyIdType>().is_err() {
                anyhow::bail!("Participant entry has unknown id_type {}", entry.id_type);
            }
        }

        if self.participants.is_empty() {
            tracing::warn!("No participants configured - every directory lookup will fail");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[relayer]
instance_id = "relayer-1"
fsp_id = "payerfsp"

[switch]
base_url = "http://${PARTY_TEST_SWITCH_HOST}:4002"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[cache]
ttl_secs = 60
sweep_interval_secs = 5

[workflow]
party_lookup_flow = "PartyLookup-DFSPID"
response_message = "party-lookup-response"

[[participants]]
id_type = "MSISDN"
id_value = "254711111111"
tenant_id = "tn01"
fsp_id = "payerfsp"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        env::set_var("PARTY_TEST_SWITCH_HOST", "switch.local");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.switch.base_url, "http://switch.local:4002");
        assert_eq!(settings.switch.request_timeout_ms, 10_000);
        assert_eq!(settings.cache.read_timeout(), Duration::from_millis(250));
        assert!(settings.cache.consume_on_correlate);
        assert!(settings.workflow.gateway_url.is_none());
        assert_eq!(settings.participants.len(), 1);
        assert_eq!(settings.participants[0].tenant_id, "tn01");
    }

    #[test]
    fn test_unknown_participant_id_type_is_rejected() {
        env::set_var("PARTY_TEST_SWITCH_HOST", "switch.local");
        let broken = SAMPLE.replace("id_type = \"MSISDN\"", "id_type = \"PHONE\"");
        assert!(Settings::parse(&broken).is_err());
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        env::set_var("PARTY_TEST_SWITCH_HOST", "switch.local");
        let broken = SAMPLE.replace("ttl_secs = 60", "ttl_secs = 0");
        assert!(Settings::parse(&broken).is_err());
    }
}
