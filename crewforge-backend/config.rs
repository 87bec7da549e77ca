use std::path::PathBuf;
use std::time::Duration;

use crate::agents::llm::LlmSettings;

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETENTION_SECS: u64 = 300;
const DEFAULT_MAX_REQUIREMENTS_LENGTH: usize = 5000;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    /// Model credential. `None` runs every stage on canned responses.
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub job_retention: Duration,
    pub max_requirements_length: usize,
    pub static_dir: Option<PathBuf>,
}

/// Raw, unparsed values as they come out of the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawConfig<'a> {
    pub port: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub llm_api_key: Option<&'a str>,
    pub openai_api_key: Option<&'a str>,
    pub llm_base_url: Option<&'a str>,
    pub llm_model: Option<&'a str>,
    pub llm_timeout_secs: Option<&'a str>,
    pub job_retention_secs: Option<&'a str>,
    pub max_requirements_length: Option<&'a str>,
    pub static_dir: Option<&'a str>,
}

impl Config {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        let port = var("PORT");
        let sentry_dsn = var("SENTRY_DSN");
        let environment = var("ENVIRONMENT");
        let llm_api_key = var("LLM_API_KEY");
        let openai_api_key = var("OPENAI_API_KEY");
        let llm_base_url = var("LLM_BASE_URL");
        let llm_model = var("LLM_MODEL");
        let llm_timeout_secs = var("LLM_TIMEOUT_SECS");
        let job_retention_secs = var("JOB_RETENTION_SECS");
        let max_requirements_length = var("MAX_REQUIREMENTS_LENGTH");
        let static_dir = var("STATIC_DIR");

        Self::from_raw_values(RawConfig {
            port: port.as_deref(),
            sentry_dsn: sentry_dsn.as_deref(),
            environment: environment.as_deref(),
            llm_api_key: llm_api_key.as_deref(),
            openai_api_key: openai_api_key.as_deref(),
            llm_base_url: llm_base_url.as_deref(),
            llm_model: llm_model.as_deref(),
            llm_timeout_secs: llm_timeout_secs.as_deref(),
            job_retention_secs: job_retention_secs.as_deref(),
            max_requirements_length: max_requirements_length.as_deref(),
            static_dir: static_dir.as_deref(),
        })
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(raw: RawConfig<'_>) -> Self {
        Config {
            port: parse_or(raw.port, DEFAULT_PORT),
            sentry_dsn: non_empty(raw.sentry_dsn),
            environment: non_empty(raw.environment).unwrap_or_else(|| "local".to_string()),
            llm_api_key: non_empty(raw.llm_api_key).or_else(|| non_empty(raw.openai_api_key)),
            llm_base_url: non_empty(raw.llm_base_url)
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            llm_model: non_empty(raw.llm_model).unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            llm_timeout: Duration::from_secs(parse_positive(
                raw.llm_timeout_secs,
                DEFAULT_LLM_TIMEOUT_SECS,
            )),
            job_retention: Duration::from_secs(parse_positive(
                raw.job_retention_secs,
                DEFAULT_RETENTION_SECS,
            )),
            max_requirements_length: parse_positive(
                raw.max_requirements_length,
                DEFAULT_MAX_REQUIREMENTS_LENGTH as u64,
            ) as usize,
            static_dir: non_empty(raw.static_dir).map(PathBuf::from),
        }
    }

    /// Connection settings for the model endpoint, when a credential is set.
    pub fn llm_settings(&self) -> Option<LlmSettings> {
        self.llm_api_key.as_ref().map(|api_key| LlmSettings {
            base_url: self.llm_base_url.clone(),
            api_key: api_key.clone(),
            model: self.llm_model.clone(),
            timeout: self.llm_timeout,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

fn parse_or<T: std::str::FromStr>(value: Option<&str>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_positive(value: Option<&str>, default: u64) -> u64 {
    match parse_or(value, default) {
        0 => default,
        n => n,
    }
}
