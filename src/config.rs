use std::{fmt, time::Duration};

use anyhow::{bail, Context};

use crate::monster::PollPolicy;

pub const DEFAULT_GENERATE_URL: &str = "https://api.monsterapi.ai/v1/generate/sdxl-base";

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First few characters followed by `***`, for startup logs.
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}***")
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub passcode: Secret,
    pub api_key: Secret,
    pub generate_url: String,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let passcode = required(&lookup, "PASSCODE")?;
        let api_key = required(&lookup, "MONSTERAPI_KEY")?;
        let generate_url =
            lookup("MONSTERAPI_GENERATE_URL").unwrap_or_else(|| DEFAULT_GENERATE_URL.to_string());

        let interval_secs: u64 = parsed(&lookup, "POLL_INTERVAL_SECS")?.unwrap_or(5);
        let max_attempts: Option<u32> = parsed(&lookup, "POLL_MAX_ATTEMPTS")?;
        if max_attempts == Some(0) {
            bail!("POLL_MAX_ATTEMPTS must be at least 1");
        }
        let timeout_secs: u64 = parsed(&lookup, "REQUEST_TIMEOUT_SECS")?.unwrap_or(30);
        let port: u16 = parsed(&lookup, "PORT")?.unwrap_or(8080);

        Ok(Self {
            passcode: Secret::new(passcode),
            api_key: Secret::new(api_key),
            generate_url,
            poll: PollPolicy {
                interval: Duration::from_secs(interval_secs),
                max_attempts,
            },
            request_timeout: Duration::from_secs(timeout_secs),
            port,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => bail!("{key} is set but empty"),
        None => bail!("{key} must be set (environment or .env)"),
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|v| v.trim().parse::<T>().with_context(|| format!("{key}={v:?} is not valid")))
        .transpose()
}
