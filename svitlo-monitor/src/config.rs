use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use svitlo_common::telegram::DEFAULT_API_URL;

use crate::error::ConfigError;

/// Upper bound for every single timing setting, keeps derived deadlines far from overflow.
const MAX_SETTING: time::Duration = time::Duration::from_secs(365 * 24 * 3600);

/// Upper bound for the total run duration.
const MAX_DURATION_HOURS: u64 = 100 * 365 * 24;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(from = "TARGET_ADDRESS")]
    pub target_address: String,

    #[envconfig(from = "INTERVAL_SECONDS", default = "30")]
    pub interval_seconds: u64,

    #[envconfig(from = "DURATION_HOURS")]
    pub duration_hours: Option<u64>,

    #[envconfig(from = "PROBE_ATTEMPTS", default = "4")]
    pub probe_attempts: u32,

    #[envconfig(from = "PROBE_TIMEOUT_SECS", default = "3")]
    pub probe_timeout_secs: u64,

    #[envconfig(from = "SUBSCRIBERS_PATH", default = "chat_ids.csv")]
    pub subscribers_path: String,

    #[envconfig(nested = true)]
    pub telegram: TelegramConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct TelegramConfig {
    #[envconfig(from = "TELEGRAM_BOT_TOKEN")]
    pub bot_token: Option<String>,

    #[envconfig(from = "TELEGRAM_API_URL")]
    pub api_url: Option<String>,

    #[envconfig(from = "TELEGRAM_POLL_TIMEOUT_SECS", default = "30")]
    pub poll_timeout_secs: u64,

    #[envconfig(from = "TELEGRAM_REQUEST_TIMEOUT", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "TELEGRAM_RETRY_INTERVAL", default = "5000")]
    pub retry_interval: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_address.trim().is_empty() {
            return Err(ConfigError::Invalid("TARGET_ADDRESS must not be empty"));
        }
        if self.interval_seconds == 0 {
            return Err(ConfigError::Invalid("INTERVAL_SECONDS must be positive"));
        }
        if self.interval() > MAX_SETTING {
            return Err(ConfigError::Invalid("INTERVAL_SECONDS must be at most a year"));
        }
        match self.duration_hours {
            Some(0) => return Err(ConfigError::Invalid("DURATION_HOURS must be positive")),
            Some(hours) if hours > MAX_DURATION_HOURS => {
                return Err(ConfigError::Invalid(
                    "DURATION_HOURS must be at most a hundred years",
                ))
            }
            _ => {}
        }
        if self.probe_attempts == 0 {
            return Err(ConfigError::Invalid("PROBE_ATTEMPTS must be at least 1"));
        }
        if self.probe_budget() > MAX_SETTING {
            return Err(ConfigError::Invalid(
                "PROBE_ATTEMPTS x PROBE_TIMEOUT_SECS must be at most a year",
            ));
        }
        self.telegram.validate()
    }

    pub fn interval(&self) -> time::Duration {
        time::Duration::from_secs(self.interval_seconds)
    }

    pub fn duration(&self) -> Option<time::Duration> {
        self.duration_hours
            .map(|hours| time::Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn probe_timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.probe_timeout_secs)
    }

    /// Worst case wall time of a single probe: every attempt waits out its reply timeout.
    pub fn probe_budget(&self) -> time::Duration {
        self.probe_timeout().saturating_mul(self.probe_attempts)
    }

    /// The poller must report liveness at least this often.
    pub fn poller_deadline(&self) -> time::Duration {
        self.interval()
            .saturating_mul(4)
            .saturating_add(self.probe_budget())
    }
}

impl TelegramConfig {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn poll_timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.poll_timeout_secs)
    }

    /// The listener must report liveness at least this often.
    pub fn listener_deadline(&self) -> time::Duration {
        self.poll_timeout()
            .saturating_add(self.request_timeout.0)
            .saturating_add(self.retry_interval.0)
            .saturating_mul(4)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let settings = [
            ("TELEGRAM_POLL_TIMEOUT_SECS must be at most a year", self.poll_timeout()),
            ("TELEGRAM_REQUEST_TIMEOUT must be at most a year", self.request_timeout.0),
            ("TELEGRAM_RETRY_INTERVAL must be at most a year", self.retry_interval.0),
        ];
        match settings.into_iter().find(|(_, value)| *value > MAX_SETTING) {
            Some((reason, _)) => Err(ConfigError::Invalid(reason)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
