use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    /// Requests per second allowed for a single exam session.
    pub public_rps: u32,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env_or("SERVER_ADDRESS", "0.0.0.0:8080"),
            database_url: get_env("DATABASE_URL")?,
            public_rps: get_env_parse_or("PUBLIC_RPS", 20)?,
            db_max_connections: get_env_parse_or("DB_MAX_CONNECTIONS", 20)?,
            log_format: match get_env_or("LOG_FORMAT", "text").as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            },
        })
    }
}

/// Settings for the in-tab exam core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Directory holding the durable queue journals. `None` keeps them in memory.
    pub queue_dir: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub presubmit_sync_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            queue_dir: None,
            heartbeat_interval: Duration::from_secs(10),
            presubmit_sync_timeout: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(5000),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mut config = Self::new(get_env("EXAM_API_URL")?);
        config.queue_dir = env::var("EXAM_QUEUE_DIR").ok().map(PathBuf::from);
        config.heartbeat_interval =
            Duration::from_secs(get_env_parse_or("HEARTBEAT_INTERVAL_SECS", 10)?);
        config.presubmit_sync_timeout =
            Duration::from_millis(get_env_parse_or("PRESUBMIT_SYNC_TIMEOUT_MS", 3000)?);
        config.request_timeout =
            Duration::from_millis(get_env_parse_or("REQUEST_TIMEOUT_MS", 5000)?);
        Ok(config)
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
