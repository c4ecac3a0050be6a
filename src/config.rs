//! Runtime settings.
//!
//! Every setting can come from a flag or from the environment (a `.env`
//! file is loaded first by the binary).

use std::time::Duration;

use chrono::TimeDelta;
use clap::Args;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be strictly positive")]
    NotPositive(&'static str),
    #[error("{0} is required for this command")]
    Missing(&'static str),
    #[error("{0} is too large")]
    OutOfRange(&'static str),
}

/// Raw settings as parsed from flags and environment variables.
#[derive(Debug, Clone, Args)]
pub struct SettingsArgs {
    /// Base URL of the document store (collections are fetched below it)
    #[arg(long, env = "FLEET_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Bearer token sent to the document store
    #[arg(long, env = "FLEET_STORE_TOKEN", hide_env_values = true, global = true)]
    pub store_token: Option<String>,

    /// Clock tick driving motion updates, in milliseconds
    #[arg(long, env = "FLEET_TICK_MS", default_value_t = 250, global = true)]
    pub tick_ms: u64,

    /// How often the store is polled for changes, in seconds
    #[arg(long, env = "FLEET_POLL_SECS", default_value_t = 5, global = true)]
    pub poll_secs: u64,

    /// Active or in-transit loads older than this are counted as delayed, in hours
    #[arg(long, env = "FLEET_DELAY_HOURS", default_value_t = 48, global = true)]
    pub delay_hours: i64,

    /// How long a live marker takes to glide to a reported position, in milliseconds
    #[arg(long, env = "FLEET_SMOOTHING_MS", default_value_t = 1000, global = true)]
    pub smoothing_ms: u64,

    /// Base URL of a Nominatim-compatible reverse geocoder
    #[arg(long, env = "FLEET_GEOCODER_URL", global = true)]
    pub geocoder_url: Option<String>,

    /// Reverse geocoding timeout, in milliseconds
    #[arg(long, env = "FLEET_GEOCODE_TIMEOUT_MS", default_value_t = 3000, global = true)]
    pub geocode_timeout_ms: u64,

    /// Wait before re-subscribing to a failed collection, in seconds
    #[arg(long, env = "FLEET_RESUBSCRIBE_SECS", default_value_t = 10, global = true)]
    pub resubscribe_secs: u64,
}

/// Validated settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store_url: Option<String>,
    pub store_token: Option<String>,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    pub delay_threshold: TimeDelta,
    pub smoothing: TimeDelta,
    pub geocoder_url: Option<String>,
    pub geocode_timeout: Duration,
    pub resubscribe_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: None,
            store_token: None,
            tick_interval: Duration::from_millis(250),
            poll_interval: Duration::from_secs(5),
            delay_threshold: TimeDelta::hours(48),
            smoothing: TimeDelta::milliseconds(1000),
            geocoder_url: None,
            geocode_timeout: Duration::from_millis(3000),
            resubscribe_delay: Duration::from_secs(10),
        }
    }
}

impl Settings {
    pub fn store_url(&self) -> Result<&str, ConfigError> {
        self.store_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("FLEET_STORE_URL"))
    }
}

fn positive(value: u64, key: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive(key));
    }
    Ok(value)
}

impl TryFrom<SettingsArgs> for Settings {
    type Error = ConfigError;

    fn try_from(args: SettingsArgs) -> Result<Self, Self::Error> {
        if args.delay_hours <= 0 {
            return Err(ConfigError::NotPositive("FLEET_DELAY_HOURS"));
        }
        let delay_threshold = TimeDelta::try_hours(args.delay_hours)
            .ok_or(ConfigError::OutOfRange("FLEET_DELAY_HOURS"))?;
        let smoothing = i64::try_from(args.smoothing_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .ok_or(ConfigError::OutOfRange("FLEET_SMOOTHING_MS"))?;

        Ok(Self {
            store_url: args.store_url.filter(|s| !s.trim().is_empty()),
            store_token: args.store_token.filter(|s| !s.trim().is_empty()),
            tick_interval: Duration::from_millis(positive(args.tick_ms, "FLEET_TICK_MS")?),
            poll_interval: Duration::from_secs(positive(args.poll_secs, "FLEET_POLL_SECS")?),
            delay_threshold,
            smoothing,
            geocoder_url: args.geocoder_url.filter(|s| !s.trim().is_empty()),
            geocode_timeout: Duration::from_millis(positive(
                args.geocode_timeout_ms,
                "FLEET_GEOCODE_TIMEOUT_MS",
            )?),
            resubscribe_delay: Duration::from_secs(positive(
                args.resubscribe_secs,
                "FLEET_RESUBSCRIBE_SECS",
            )?),
        })
    }
}
