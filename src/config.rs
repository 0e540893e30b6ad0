//! Server configuration

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Environment variable overriding the default registry location
pub const REGISTRY_URL_ENV: &str = "EVENTDOC_REGISTRY_URL";

const DEFAULT_REGISTRY_URL: &str = "http://localhost:8080/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid registry url {url:?}: {source}")]
    RegistryUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid initialization options: {0}")]
    Options(#[from] serde_json::Error),
}

/// Settings the editor may pass as `initializationOptions`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the schema registry
    #[serde(default = "default_registry_url", deserialize_with = "deserialize_base_url")]
    pub registry_url: Url,
    /// Forward focus/merge commands to the client as notifications
    #[serde(default = "default_true")]
    pub forward_commands: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            forward_commands: true,
        }
    }
}

impl Config {
    /// Build the configuration from the editor's initialization options,
    /// falling back to defaults when none are given
    pub fn from_initialization_options(options: Option<&JsonValue>) -> Result<Self, ConfigError> {
        match options {
            None | Some(JsonValue::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_registry_url() -> Url {
    if let Ok(raw) = std::env::var(REGISTRY_URL_ENV) {
        match parse_base_url(&raw) {
            Ok(url) => return url,
            Err(e) => warn!("Ignoring {}: {}", REGISTRY_URL_ENV, e),
        }
    }
    Url::parse(DEFAULT_REGISTRY_URL).expect("default registry url is valid")
}

/// Parse a base URL, making sure relative paths join beneath it
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::RegistryUrl {
        url: raw.to_string(),
        source,
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn deserialize_base_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_base_url(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_camel_case_options() {
        let options = json!({ "registryUrl": "https://registry.example.com/events", "forwardCommands": false });
        let config = Config::from_initialization_options(Some(&options)).unwrap();
        assert_eq!(config.registry_url.as_str(), "https://registry.example.com/events/");
        assert!(!config.forward_commands);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = Config::from_initialization_options(Some(&json!({}))).unwrap();
        assert!(config.forward_commands);
        assert_eq!(config.registry_url, default_registry_url());

        let config = Config::from_initialization_options(None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_invalid_urls() {
        let options = json!({ "registryUrl": "not a url" });
        assert!(matches!(
            Config::from_initialization_options(Some(&options)),
            Err(ConfigError::Options(_))
        ));
        assert!(parse_base_url("::").is_err());
    }

    #[test]
    fn base_url_joins_api_paths_beneath_it() {
        let base = parse_base_url("http://host:9000/prefix").unwrap();
        assert_eq!(
            base.join("api/registry/schema").unwrap().as_str(),
            "http://host:9000/prefix/api/registry/schema"
        );
    }
}
