//! Build the configured provider, wrapped for retries and circuit breaking.

use clawloop_config::AppConfig;
use clawloop_core::error::ProviderError;
use clawloop_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::openai_compat::OpenAiCompatProvider;
use crate::resilient::ResilientProvider;
use crate::retry::RetryPolicy;

/// Create the raw provider named by `config.default_provider`.
///
/// Known names get their preset base URL; any other name must have an
/// `api_url` in `[providers.<name>]`.
pub fn build_raw(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.default_provider.as_str();
    let section = config.providers.get(name);
    let api_key = section
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone());
    let api_url = section.and_then(|p| p.api_url.clone());

    let provider = match (name, api_url) {
        ("ollama", url) => OpenAiCompatProvider::ollama(url.as_deref()),
        (_, Some(url)) => OpenAiCompatProvider::new(name, url, api_key.unwrap_or_default()),
        ("openrouter", None) => OpenAiCompatProvider::openrouter(require_key(name, api_key)?),
        ("openai", None) => OpenAiCompatProvider::openai(require_key(name, api_key)?),
        (other, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "unknown provider '{other}': set providers.{other}.api_url"
            )));
        }
    };
    Ok(Arc::new(provider))
}

fn require_key(name: &str, key: Option<String>) -> Result<String, ProviderError> {
    key.filter(|k| !k.is_empty()).ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "no API key for '{name}': set api_key in config.toml or CLAWLOOP_API_KEY"
        ))
    })
}

/// The model to request: the provider section's override, or the default.
pub fn model_for(config: &AppConfig) -> String {
    config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone())
}

/// The breaker and retry settings from `[resilience]`.
pub fn breaker_from_config(config: &AppConfig) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        config.resilience.circuit_breaker_failure_threshold,
        config.resilience.circuit_breaker_cooldown(),
    ))
}

pub fn retry_policy_from_config(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.resilience.retry_max_attempts,
        config.resilience.retry_base_delay(),
        config.resilience.retry_max_delay(),
    )
}

/// Build the configured provider wrapped in a `ResilientProvider`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<ResilientProvider>, ProviderError> {
    let raw = build_raw(config)?;
    info!(
        provider = %raw.name(),
        timeout_secs = config.resilience.provider_timeout_seconds,
        max_attempts = config.resilience.retry_max_attempts,
        "Provider ready"
    );
    Ok(Arc::new(
        ResilientProvider::new(raw, breaker_from_config(config))
            .with_policy(retry_policy_from_config(config))
            .with_timeout(config.resilience.provider_timeout()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawloop_config::ProviderConfig;

    #[test]
    fn openrouter_without_key_is_not_configured() {
        let config = AppConfig::default();
        assert!(matches!(
            build_raw(&config).err(),
            Some(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn builds_openrouter_with_key() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openrouter");
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = AppConfig {
            default_provider: "ollama".into(),
            ..AppConfig::default()
        };
        assert_eq!(build_raw(&config).unwrap().name(), "ollama");
    }

    #[test]
    fn custom_provider_uses_section() {
        let mut config = AppConfig {
            default_provider: "vllm".into(),
            ..AppConfig::default()
        };
        config.providers.insert(
            "vllm".into(),
            ProviderConfig {
                api_key: None,
                api_url: Some("http://localhost:8000/v1".into()),
                default_model: Some("qwen2.5".into()),
            },
        );
        assert_eq!(build_raw(&config).unwrap().name(), "vllm");
        assert_eq!(model_for(&config), "qwen2.5");
    }

    #[test]
    fn unknown_provider_without_url_fails() {
        let config = AppConfig {
            default_provider: "mystery".into(),
            ..AppConfig::default()
        };
        assert!(build_raw(&config).is_err());
    }
}
