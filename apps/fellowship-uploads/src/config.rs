//! Service configuration read from the environment

use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use fellowship_baas::BaasConfig;
use fellowship_domain::upload::{SettleStrategy, UploadConfig};

/// Largest accepted `UPLOAD_MAX_ATTEMPTS`
const MAX_UPLOAD_ATTEMPTS: u32 = 20;

/// Largest accepted `UPLOAD_MAX_POLLS`
const MAX_RECORD_POLLS: u32 = 100;

/// Largest accepted value for each `*_MS` upload wait
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Where uploaded objects are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// The BaaS storage API (owner foreign key, retried on lag)
    Baas,
    /// An S3-compatible bucket served from `public_url`
    S3 { public_url: String },
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub baas: BaasConfig,
    pub storage: StorageBackendKind,
    pub upload: UploadConfig,
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from the process environment (and `.env`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mut baas = BaasConfig::new(env.required("BAAS_URL")?, env.required("BAAS_SERVICE_KEY")?);
        baas.timeout = Duration::from_secs(env.parse_or("BAAS_TIMEOUT_SECS", 30u64)?);
        if let Some(table) = env.get("BAAS_USERS_TABLE") {
            baas.users_table = table;
        }

        let storage = match env
            .get("STORAGE_BACKEND")
            .unwrap_or_else(|| "baas".to_string())
            .to_lowercase()
            .as_str()
        {
            "baas" => StorageBackendKind::Baas,
            "s3" => StorageBackendKind::S3 {
                public_url: env.required("S3_PUBLIC_URL")?,
            },
            other => {
                return Err(anyhow!(
                    "STORAGE_BACKEND must be 'baas' or 's3', got '{}'",
                    other
                ))
            }
        };

        let defaults = UploadConfig::default();
        let settle_strategy = match (
            env.get("UPLOAD_POLL_INTERVAL_MS"),
            env.get("UPLOAD_MAX_POLLS"),
        ) {
            (Some(_), Some(_)) => SettleStrategy::PollUntilVisible {
                interval: within_max_wait(
                    "UPLOAD_POLL_INTERVAL_MS",
                    env.millis_or("UPLOAD_POLL_INTERVAL_MS", Duration::ZERO)?,
                )?,
                max_polls: within(
                    "UPLOAD_MAX_POLLS",
                    env.parse_or("UPLOAD_MAX_POLLS", 1u32)?,
                    1,
                    MAX_RECORD_POLLS,
                )?,
            },
            _ => SettleStrategy::FixedDelay,
        };

        let upload = UploadConfig {
            max_attempts: within(
                "UPLOAD_MAX_ATTEMPTS",
                env.parse_or("UPLOAD_MAX_ATTEMPTS", defaults.max_attempts)?,
                1,
                MAX_UPLOAD_ATTEMPTS,
            )?,
            record_settle: within_max_wait(
                "UPLOAD_RECORD_SETTLE_MS",
                env.millis_or("UPLOAD_RECORD_SETTLE_MS", defaults.record_settle)?,
            )?,
            upload_settle: within_max_wait(
                "UPLOAD_SETTLE_MS",
                env.millis_or("UPLOAD_SETTLE_MS", defaults.upload_settle)?,
            )?,
            backoff_step: within_max_wait(
                "UPLOAD_BACKOFF_STEP_MS",
                env.millis_or("UPLOAD_BACKOFF_STEP_MS", defaults.backoff_step)?,
            )?,
            max_file_size: env.parse_or("UPLOAD_MAX_FILE_SIZE", defaults.max_file_size)?,
            settle_strategy,
        };

        Ok(Self {
            host: env.get("UPLOADS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse_or("UPLOADS_PORT", 3000u16)?,
            baas,
            storage,
            upload,
            log_json: env
                .get("LOG_FORMAT")
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        })
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn within(key: &str, value: u32, min: u32, max: u32) -> Result<u32> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(anyhow!("{} must be between {} and {}, got {}", key, min, max, value))
    }
}

fn within_max_wait(key: &str, value: Duration) -> Result<Duration> {
    if value <= MAX_WAIT {
        Ok(value)
    } else {
        Err(anyhow!(
            "{} must be at most {}, got {}",
            key,
            MAX_WAIT.as_millis(),
            value.as_millis()
        ))
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .with_context(|| format!("{} must be set", key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
            None => Ok(default),
        }
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration> {
        let millis = self.parse_or(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(millis))
    }
}
