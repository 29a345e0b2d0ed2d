//! Configuration loading: CLI flags override environment variables
//! (`PEG_*` prefix) override a TOML file override built-in defaults. Every
//! field has a default and is validated once at startup; validation
//! failures abort before any request is processed.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub prompt: PromptConfig,
    pub time: TimeConfig,
    pub thresholds: ThresholdConfig,
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub result_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoints: Vec<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base: f64,
    pub max_prompt_chars: usize,
    pub truncate_buffer: usize,
    pub mock: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub template_path: String,
    pub preview_rows: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub default_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub stable_pct: f64,
    pub medium_pct: f64,
    pub high_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
}

/// Command-line overrides, highest priority in the loading order.
#[derive(Parser, Debug, Clone)]
#[command(name = "peg-analysis")]
#[command(version, about = "5G PEG comparison analysis pipeline")]
pub struct CommandLineArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to a TOML configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<String>,

    /// PEG store connection URL (overrides config file)
    #[arg(long, value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g. "info,peg_analysis=debug")
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// LLM per-attempt timeout (overrides config file, e.g. "30s", "2m")
    #[arg(long, value_name = "DURATION", global = true)]
    pub llm_timeout: Option<String>,

    /// Force LLM mock mode regardless of the request's `enable_mock`
    #[arg(long, global = true)]
    pub llm_mock: Option<bool>,

    /// Abort the whole analysis (both fetches, the LLM call) after this many
    /// seconds; omit for no deadline.
    #[arg(long, value_name = "SECONDS", global = true)]
    pub deadline_secs: Option<u64>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one pipeline invocation against a request document.
    Analyze {
        /// Path to a JSON request file, or "-" for stdin.
        #[arg(long, default_value = "-")]
        request: String,
    },
    /// Reload the prompt template document from disk and report the outcome.
    ReloadTemplates,
}

impl Config {
    /// Loading order, highest to lowest priority: CLI flags, then `PEG_*`
    /// environment variables, then the TOML config file, then defaults.
    pub fn load(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(path) = config_path {
            Self::from_toml(&path)?
        } else {
            tracing::warn!("no configuration file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PEG_DATABASE_URL") {
            self.database.url = url;
            tracing::info!("override database.url from env");
        }
        if let Ok(level) = std::env::var("PEG_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("override logging.level from env: {}", self.logging.level);
        }
        if let Ok(endpoints) = std::env::var("PEG_LLM_ENDPOINTS") {
            self.llm.endpoints = endpoints.split(',').map(|s| s.trim().to_string()).collect();
            tracing::info!("override llm.endpoints from env");
        }
        if let Ok(model) = std::env::var("PEG_LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("override llm.model from env: {}", self.llm.model);
        }
        if let Ok(mock) = std::env::var("PEG_LLM_MOCK") {
            if let Ok(val) = mock.parse() {
                self.llm.mock = val;
                tracing::info!("override llm.mock from env: {}", self.llm.mock);
            }
        }
        if let Ok(url) = std::env::var("PEG_BACKEND_URL") {
            self.backend.url = Some(url);
            tracing::info!("override backend.url from env");
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(url) = &args.database_url {
            self.database.url = url.clone();
            tracing::info!("override database.url from CLI");
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("override logging.level from CLI: {}", self.logging.level);
        }
        if let Some(timeout) = &args.llm_timeout {
            match parse_duration_to_secs(timeout) {
                Ok(val) => {
                    self.llm.timeout_secs = val;
                    tracing::info!("override llm.timeout_secs from CLI: {}", val);
                },
                Err(e) => tracing::warn!(
                    "invalid --llm-timeout '{}': {} (keep {})",
                    timeout,
                    e,
                    self.llm.timeout_secs
                ),
            }
        }
        if let Some(mock) = args.llm_mock {
            self.llm.mock = mock;
            tracing::info!("override llm.mock from CLI: {}", mock);
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database.url.is_empty() && !self.llm.mock {
            anyhow::bail!("database.url cannot be empty unless llm.mock is set");
        }
        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be > 0");
        }
        if self.llm.endpoints.is_empty() && !self.llm.mock {
            anyhow::bail!("llm.endpoints cannot be empty unless llm.mock is set");
        }
        if self.llm.max_prompt_chars <= self.llm.truncate_buffer {
            anyhow::bail!("llm.max_prompt_chars must exceed llm.truncate_buffer");
        }
        if !(0.0..=100.0).contains(&self.thresholds.stable_pct)
            || self.thresholds.medium_pct <= self.thresholds.stable_pct
            || self.thresholds.high_pct <= self.thresholds.medium_pct
        {
            anyhow::bail!("thresholds must satisfy stable_pct < medium_pct < high_pct");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let candidates = ["config.toml", "conf/config.toml", "./config.toml", "./conf/config.toml"];
        candidates.iter().find(|p| Path::new(p).exists()).map(|s| s.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new(), pool_size: 10, max_retries: 2, retry_delay_ms: 100, result_limit: 1_000_000 }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 180,
            max_retries: 3,
            backoff_base: 1.0,
            max_prompt_chars: 80_000,
            truncate_buffer: 200,
            mock: false,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { template_path: "conf/prompt_templates.toml".to_string(), preview_rows: 200 }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self { default_offset_minutes: 540 }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self { stable_pct: 5.0, medium_pct: 10.0, high_pct: 20.0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,peg_analysis=debug".to_string(), file: None }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { url: None }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }
    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_in_mock_mode() {
        let mut config = Config::default();
        config.llm.mock = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_database_url_without_mock_fails_validation() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_ordering_is_enforced() {
        let mut config = Config::default();
        config.llm.mock = true;
        config.thresholds.medium_pct = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_string_parses_into_seconds() {
        assert_eq!(parse_duration_to_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_to_secs("2m").unwrap(), 120);
        assert_eq!(parse_duration_to_secs("180").unwrap(), 180);
    }
}
