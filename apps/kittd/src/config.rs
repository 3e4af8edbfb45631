// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered configuration for `kittd`, structured like
//! `apps/skit/src/config.rs`: a `figment`-merged [`Config`] (defaults →
//! file/body → environment), every struct `schemars`-derived the same
//! way, even though this service exposes no `/schema`
//! endpoint for it.
//!
//! The env vars are named directly rather than with a `SK_`-style prefix:
//! `LIVEGPT_CONFIG_FILE` (a path to a YAML config document) or
//! `LIVEGPT_CONFIG_BODY` (the document inline), plus `OPENAI_API_KEY` as
//! a fallback when the config omits `openai_api_key`. Google credentials
//! (`GOOGLE_APPLICATION_CREDENTIALS[_BODY]`) are resolved separately in
//! [`crate::providers`] — they configure the STT transport, not this
//! struct.

use figment::providers::{Env, Serialized};
use figment::Figment;
use kitt_core::{KittError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8080
}

/// LiveKit-shaped room SDK credentials. `kittd` never dials the SFU
/// itself (out of scope here) — these are handed to the
/// `RoomClient` implementation a deployment wires in.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct LiveKitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

/// Log level for filtering messages, matching `apps/skit`'s `LogLevel`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file format, matching `apps/skit`'s `LogFormat`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `logging.*`: console and optional rolling-file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
    #[serde(default)]
    pub file_format: LogFormat,
}

fn default_true() -> bool {
    true
}

fn default_log_file_path() -> String {
    "./kittd.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: default_log_file_path(),
            file_format: LogFormat::default(),
        }
    }
}

/// Root configuration for `kittd`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub livekit: LiveKitConfig,
    /// Falls back to `OPENAI_API_KEY` if absent here.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// The OpenAI key, preferring the config document and falling back to
    /// the `OPENAI_API_KEY` environment variable.
    #[must_use]
    pub fn resolved_openai_api_key(&self) -> Option<String> {
        self.openai_api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Result of [`load`]: the resolved config plus whether the configured
/// source was actually found (mirrors `apps/skit`'s `ConfigLoadResult`,
/// which never fails a run over a missing file — only over an
/// unparsable one).
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub source_missing: bool,
}

/// Loads configuration from defaults, then `LIVEGPT_CONFIG_BODY` (inline
/// YAML) or `LIVEGPT_CONFIG_FILE` (a path to a YAML file) if set, then
/// environment overrides (`KITTD_` prefix, `__` nesting separator,
/// matching `apps/skit`'s `SK_`-prefixed `Env::prefixed(...).split("__")`
/// idiom).
///
/// # Errors
///
/// Returns an error if the YAML body/file is malformed, or if an
/// environment override does not deserialize into its target field.
pub fn load() -> Result<ConfigLoadResult> {
    let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
    let mut source_missing = false;

    if let Ok(body) = std::env::var("LIVEGPT_CONFIG_BODY") {
        figment = figment.merge(yaml_provider(&body)?);
    } else if let Ok(path) = std::env::var("LIVEGPT_CONFIG_FILE") {
        if std::path::Path::new(&path).exists() {
            let body = std::fs::read_to_string(&path)?;
            figment = figment.merge(yaml_provider(&body)?);
        } else {
            source_missing = true;
        }
    }

    let config: Config = figment
        .merge(Env::prefixed("KITTD_").split("__"))
        .extract()
        .map_err(|e| KittError::Configuration(format!("failed to load config: {e}")))?;

    Ok(ConfigLoadResult { config, source_missing })
}

/// Parses a YAML document into a `figment` provider, via `serde-saphyr`
/// (the same YAML crate used elsewhere in `apps/skit` for its own
/// inline-YAML bodies) rather than `figment`'s own TOML-only `Format`
/// providers, since `LIVEGPT_CONFIG_FILE`/`_BODY` carry YAML.
fn yaml_provider(body: &str) -> Result<Serialized<serde_json::Value>> {
    let value: serde_json::Value =
        serde_saphyr::from_str(body).map_err(|e| KittError::Configuration(format!("invalid YAML config: {e}")))?;
    Ok(Serialized::defaults(value))
}

/// Generates the default configuration as a pretty-printed YAML document
/// (the `config` CLI subcommand's `default` action).
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized.
pub fn generate_default() -> Result<String> {
    serde_saphyr::to_string(&Config::default()).map_err(|e| KittError::Configuration(format!("failed to render default config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_8080() {
        assert_eq!(Config::default().port, 8080);
    }

    #[test]
    fn resolved_openai_api_key_prefers_config_value() {
        let config = Config { openai_api_key: Some("from-config".to_string()), ..Config::default() };
        assert_eq!(config.resolved_openai_api_key().as_deref(), Some("from-config"));
    }

    #[test]
    fn yaml_provider_parses_nested_document() {
        let provider = yaml_provider("livekit:\n  url: wss://example.test\nport: 9090\n").expect("parses");
        let figment = Figment::new().merge(Serialized::defaults(Config::default())).merge(provider);
        let config: Config = figment.extract().expect("extracts");
        assert_eq!(config.livekit.url, "wss://example.test");
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn generate_default_round_trips_through_saphyr() {
        let yaml = generate_default().expect("renders");
        let config: Config = serde_saphyr::from_str(&yaml).expect("parses back");
        assert_eq!(config.port, Config::default().port);
    }
}
