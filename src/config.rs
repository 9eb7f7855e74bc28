use std::{path::PathBuf, str::FromStr, time::Duration};

use jamroom_core::Config;

use crate::HostError;

/// Everything the host needs to start, read from `JAMROOM_*` environment variables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub engine: Config,
    /// Where finished media is written. Media is kept in memory if unset.
    pub media_dir: Option<PathBuf>,
    /// The url media is publicly served under.
    pub public_url: String,
    pub verbose: bool,
}

impl HostConfig {
    pub fn from_env() -> Result<Self, HostError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source, falling back to defaults for unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HostError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let defaults = Config::default();
        let engine = Config {
            download_concurrency: parse(&read, "JAMROOM_DOWNLOAD_CONCURRENCY")?
                .unwrap_or(defaults.download_concurrency),
            grace_period: seconds(&read, "JAMROOM_GRACE_PERIOD_SECS")?
                .unwrap_or(defaults.grace_period),
            empty_room_timeout: seconds(&read, "JAMROOM_EMPTY_ROOM_TIMEOUT_SECS")?
                .unwrap_or(defaults.empty_room_timeout),
            sweep_interval: seconds(&read, "JAMROOM_SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            max_queue_len: parse(&read, "JAMROOM_MAX_QUEUE_LEN")?
                .unwrap_or(defaults.max_queue_len),
            max_members: parse(&read, "JAMROOM_MAX_MEMBERS")?.unwrap_or(defaults.max_members),
            autoplay: parse(&read, "JAMROOM_AUTOPLAY")?.unwrap_or(defaults.autoplay),
            ..defaults
        };

        if engine.download_concurrency == 0 {
            return Err(HostError::InvalidEnv {
                name: "JAMROOM_DOWNLOAD_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if engine.sweep_interval.is_zero() {
            return Err(HostError::InvalidEnv {
                name: "JAMROOM_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            engine,
            media_dir: read("JAMROOM_MEDIA_DIR").map(PathBuf::from),
            public_url: read("JAMROOM_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8080/media".to_string()),
            verbose: parse(&read, "JAMROOM_VERBOSE")?.unwrap_or_default(),
        })
    }
}

fn parse<T, F>(read: &F, name: &'static str) -> Result<Option<T>, HostError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    read(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| HostError::InvalidEnv { name, value })
        })
        .transpose()
}

fn seconds<F>(read: &F, name: &'static str) -> Result<Option<Duration>, HostError>
where
    F: Fn(&'static str) -> Option<String>,
{
    Ok(parse::<u64, _>(read, name)?.map(Duration::from_secs))
}
