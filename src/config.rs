//! Configuration management for Cognito.
//!
//! Configuration is read once at startup from environment variables:
//! - `GROQ_API_KEY` - Required. API key for the Groq (OpenAI-compatible) endpoint.
//! - `GROQ_MODEL_NAME` - Optional. Model identifier. Defaults to `llama3-8b-8192`.
//! - `GROQ_BASE_URL` - Optional. API base URL. Defaults to `https://api.groq.com/openai/v1`.
//! - `LLM_TEMPERATURE` - Optional. Sampling temperature in `[0, 2]`. Defaults to `0.1`.
//! - `MAX_ITERATIONS` - Optional. Maximum model calls per turn. Defaults to `15`.
//! - `SEARCH_MAX_RESULTS` - Optional. Web search result cap. Defaults to `3`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_ITERATIONS: usize = 15;
pub const DEFAULT_SEARCH_RESULTS: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Groq API key
    pub api_key: String,

    /// Model identifier sent with every completion request
    pub model: String,

    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum model calls per turn before the loop is forcibly stopped
    pub max_iterations: usize,

    /// Maximum number of web search results returned to the model
    pub search_max_results: usize,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GROQ_API_KEY` is not set or blank,
    /// and `ConfigError::InvalidValue` for unparsable optional values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GROQ_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GROQ_API_KEY".to_string()))?;

        let model = lookup("GROQ_MODEL_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = lookup("GROQ_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let temperature = match lookup("LLM_TEMPERATURE") {
            Some(raw) => {
                let value: f32 = raw.trim().parse().map_err(|e| {
                    ConfigError::InvalidValue("LLM_TEMPERATURE".to_string(), format!("{}", e))
                })?;
                if !(0.0..=2.0).contains(&value) {
                    return Err(ConfigError::InvalidValue(
                        "LLM_TEMPERATURE".to_string(),
                        format!("{} is outside [0, 2]", value),
                    ));
                }
                value
            }
            None => DEFAULT_TEMPERATURE,
        };

        let max_iterations =
            parse_positive(&lookup, "MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?;
        let search_max_results =
            parse_positive(&lookup, "SEARCH_MAX_RESULTS", DEFAULT_SEARCH_RESULTS)?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        Ok(Self {
            api_key,
            model,
            base_url,
            temperature,
            max_iterations,
            search_max_results,
            host,
            port,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            search_max_results: DEFAULT_SEARCH_RESULTS,
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be at least 1".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar("GROQ_API_KEY".to_string()));
    }

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let err = Config::from_lookup(lookup_from(&[("GROQ_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = Config::from_lookup(lookup_from(&[("GROQ_API_KEY", "gsk_test")])).unwrap();
        assert_eq!(config.api_key, "gsk_test");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.search_max_results, 3);
        assert_eq!(config.port, 3000);
        assert!((config.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("GROQ_MODEL_NAME", "llama-3.1-70b"),
            ("LLM_TEMPERATURE", "0.7"),
            ("MAX_ITERATIONS", "4"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.model, "llama-3.1-70b");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.port, 8080);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("LLM_TEMPERATURE", "hot"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "LLM_TEMPERATURE"));

        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("LLM_TEMPERATURE", "3.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "LLM_TEMPERATURE"));

        let err = Config::from_lookup(lookup_from(&[
            ("GROQ_API_KEY", "k"),
            ("MAX_ITERATIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "MAX_ITERATIONS"));
    }
}
