//! Client configuration.

use std::time::Duration;

use url::Url;

use chance_master_sync::{GuardConfig, PipelineConfig, SyncConfig};

use crate::error::{ClientError, Result};

pub const ENV_INDEXER_HTTP: &str = "CHANCE_INDEXER_HTTP";
pub const ENV_INDEXER_WS: &str = "CHANCE_INDEXER_WS";
pub const ENV_PROVER_URL: &str = "CHANCE_PROVER_URL";

/// Configuration for the [`GameClient`](crate::GameClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL endpoint for seed queries.
    pub indexer_http: String,
    /// GraphQL websocket endpoint for subscriptions.
    pub indexer_ws: String,
    /// Base URL of the proof service.
    pub prover_url: String,
    /// How often the clock display is advanced.
    pub tick_interval: Duration,
    pub sync: SyncConfig,
    pub guard: GuardConfig,
    pub pipeline: PipelineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            indexer_http: "http://localhost:8080/graphql".to_string(),
            indexer_ws: "ws://localhost:8080/graphql".to_string(),
            prover_url: "http://localhost:8000".to_string(),
            tick_interval: Duration::from_millis(250),
            sync: SyncConfig::default(),
            guard: GuardConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by the `CHANCE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_INDEXER_HTTP) {
            config.indexer_http = v;
        }
        if let Some(v) = lookup(ENV_INDEXER_WS) {
            config.indexer_ws = v;
        }
        if let Some(v) = lookup(ENV_PROVER_URL) {
            config.prover_url = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that every endpoint parses with the expected scheme.
    pub fn validate(&self) -> Result<()> {
        check_url(ENV_INDEXER_HTTP, &self.indexer_http, &["http", "https"])?;
        check_url(ENV_INDEXER_WS, &self.indexer_ws, &["ws", "wss"])?;
        check_url(ENV_PROVER_URL, &self.prover_url, &["http", "https"])?;
        if self.tick_interval.is_zero() {
            return Err(ClientError::Config("tick interval must be positive".into()));
        }
        Ok(())
    }
}

fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value).map_err(|e| ClientError::Config(format!("{name}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ClientError::Config(format!(
            "{name}: unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn test_lookup_overrides() {
        let config = ClientConfig::from_lookup(|key| match key {
            ENV_INDEXER_WS => Some("wss://indexer.example.org/graphql".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.indexer_ws, "wss://indexer.example.org/graphql");
        assert_eq!(config.indexer_http, "http://localhost:8080/graphql");
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        let err = ClientConfig::from_lookup(|key| match key {
            ENV_INDEXER_WS => Some("http://indexer/graphql".into()),
            _ => None,
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(m) if m.contains(ENV_INDEXER_WS)));
    }
}
