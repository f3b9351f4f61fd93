//! Environment-backed configuration for `chatview-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use chatview_core::{
    ViewConfig,
    config::{
        DEFAULT_COPY_TIME_FORMAT, DEFAULT_FROM_LABEL_MAX_LEN, DEFAULT_MAX_WIDTH_FRACTION,
        DEFAULT_TOOLTIP_TIME_FORMAT, is_valid_time_format,
    },
};

const DEFAULT_HANDOFF_CAPACITY: usize = 64;
const DEFAULT_MESSAGE_COUNT: usize = 8;
const DEFAULT_LIST_WIDTH: u32 = 640;
const DEFAULT_TICK_MS: u64 = 20;
const DEFAULT_IDLE_MS: u64 = 500;

/// Runtime configuration of the smoke driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Bounded capacity of the hand-off queue.
    pub handoff_capacity: usize,
    /// Number of simulated messages.
    pub message_count: usize,
    /// Width of the simulated list viewport, in pixels.
    pub list_width: u32,
    /// Delay between simulated transport events.
    pub tick: Duration,
    /// The owner loop stops after this long without mutations.
    pub idle: Duration,
    /// Display tuning passed to the synchronizer.
    pub view: ViewConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let handoff_capacity = parse_or(
            "CHATVIEW_HANDOFF_CAPACITY",
            DEFAULT_HANDOFF_CAPACITY,
            &mut lookup,
        )?;
        let message_count = parse_or(
            "CHATVIEW_SMOKE_MESSAGES",
            DEFAULT_MESSAGE_COUNT,
            &mut lookup,
        )?;
        let list_width = parse_or("CHATVIEW_LIST_WIDTH", DEFAULT_LIST_WIDTH, &mut lookup)?;
        let tick_ms = parse_or("CHATVIEW_SMOKE_TICK_MS", DEFAULT_TICK_MS, &mut lookup)?;
        let idle_ms = parse_or("CHATVIEW_SMOKE_IDLE_MS", DEFAULT_IDLE_MS, &mut lookup)?;

        let view = ViewConfig {
            max_width_fraction: parse_or(
                "CHATVIEW_MAX_WIDTH_FRACTION",
                DEFAULT_MAX_WIDTH_FRACTION,
                &mut lookup,
            )?,
            from_label_max_len: parse_or(
                "CHATVIEW_FROM_LABEL_MAX_LEN",
                DEFAULT_FROM_LABEL_MAX_LEN,
                &mut lookup,
            )?,
            tooltip_time_format: time_format_or(
                "CHATVIEW_TOOLTIP_TIME_FORMAT",
                DEFAULT_TOOLTIP_TIME_FORMAT,
                &mut lookup,
            )?,
            copy_time_format: time_format_or(
                "CHATVIEW_COPY_TIME_FORMAT",
                DEFAULT_COPY_TIME_FORMAT,
                &mut lookup,
            )?,
            ..ViewConfig::default()
        };

        if handoff_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHATVIEW_HANDOFF_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if list_width == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHATVIEW_LIST_WIDTH",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if !(view.max_width_fraction > 0.0 && view.max_width_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "CHATVIEW_MAX_WIDTH_FRACTION",
                value: view.max_width_fraction.to_string(),
                reason: "must be in (0, 1]".to_owned(),
            });
        }
        if view.from_label_max_len <= view.from_label_keep {
            return Err(ConfigError::InvalidValue {
                key: "CHATVIEW_FROM_LABEL_MAX_LEN",
                value: view.from_label_max_len.to_string(),
                reason: format!("must be greater than {}", view.from_label_keep),
            });
        }

        Ok(Self {
            handoff_capacity,
            message_count,
            list_width,
            tick: Duration::from_millis(tick_ms),
            idle: Duration::from_millis(idle_ms.max(1)),
            view,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn time_format_or<F>(
    key: &'static str,
    default: &str,
    lookup: &mut F,
) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default.to_owned());
    };
    if !is_valid_time_format(&value) {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "not a valid strftime format".to_owned(),
        });
    }
    Ok(value)
}
