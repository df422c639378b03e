use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use crate::cli::Cli;
use crate::error::ConfigError;

const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub token: Option<String>,
    pub state_root: PathBuf,
    pub request_timeout: Duration,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
}

impl Settings {
    /// Reads `EXAMRUN_*` variables. A `.env` file in the working directory is
    /// honoured when present.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_url = env_or_default("EXAMRUN_API_URL", DEFAULT_API_URL);
        let token = env_optional("EXAMRUN_TOKEN");
        let state_root = match env_optional("EXAMRUN_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_state_root()?,
        };
        let request_timeout = parse_u64(
            "EXAMRUN_REQUEST_TIMEOUT",
            env_or_default("EXAMRUN_REQUEST_TIMEOUT", "30"),
        )?;
        let log_level = env_or_default("EXAMRUN_LOG", "warn");
        let json = match env_optional("EXAMRUN_LOG_JSON") {
            Some(value) => parse_bool("EXAMRUN_LOG_JSON", value)?,
            None => false,
        };

        Ok(Self {
            api_url: normalize_api_url(&api_url),
            token,
            state_root,
            request_timeout: Duration::from_secs(request_timeout),
            telemetry: TelemetrySettings { log_level, json },
        })
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(url) = &cli.api_url {
            self.api_url = normalize_api_url(url);
        }
        if let Some(token) = &cli.token {
            self.token = Some(token.clone());
        }
        if let Some(dir) = &cli.state_dir {
            self.state_root = dir.clone();
        }
        self
    }
}

fn default_state_root() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("", "", "examrun")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoStateDir)
}

fn normalize_api_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_bool(field: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}
