//! Validated settings built from the command line.

use std::time::Duration;

use chrono::Utc;

use closure_core::{Error, InstantUnit, Result, StoreConfig};
use closure_events::TypeTag;
use closure_timers::{AckMode, ConsumerConfig, TimerKey};

use crate::cli::StoreArgs;

/// Settings for a scan pass.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub namespace: String,
    pub request_topic: String,
    pub unit: InstantUnit,
    pub request_type: TypeTag,
}

/// Settings for a consume pass.
#[derive(Debug, Clone)]
pub struct ConsumeSettings {
    pub request_topic: String,
    pub result_topic: String,
    pub result_type: TypeTag,
    pub consumer: ConsumerConfig,
}

fn required(setting: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::configuration(setting, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Build the store configuration.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the URL, namespace or database is empty.
pub fn store_config(args: &StoreArgs) -> Result<StoreConfig> {
    let config = StoreConfig::new(required("store url", &args.store_url)?)
        .with_namespace(required("store namespace", &args.store_namespace)?)
        .with_database(required("store database", &args.store_database)?);

    Ok(match (&args.store_user, &args.store_password) {
        (Some(user), Some(password)) => config.with_credentials(user.clone(), password.clone()),
        _ => config,
    })
}

impl ScanSettings {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a name is empty.
    pub fn new(namespace: &str, request_topic: &str, unit: InstantUnit, request_type: &str) -> Result<Self> {
        Ok(Self {
            namespace: required("namespace", namespace)?,
            request_topic: required("request topic", request_topic)?,
            unit,
            request_type: TypeTag::new(required("request type", request_type)?),
        })
    }
}

impl ConsumeSettings {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a name is empty, the idle window is
    /// zero, or concurrency is zero.
    pub fn new(
        request_topic: &str,
        result_topic: &str,
        result_type: &str,
        idle_window_secs: u64,
        concurrency: usize,
        ack_mode: AckMode,
    ) -> Result<Self> {
        if idle_window_secs == 0 {
            return Err(Error::configuration("idle window", "must be greater than zero"));
        }
        if concurrency == 0 {
            return Err(Error::configuration("concurrency", "must be greater than zero"));
        }

        Ok(Self {
            request_topic: required("request topic", request_topic)?,
            result_topic: required("result topic", result_topic)?,
            result_type: TypeTag::new(required("result type", result_type)?),
            consumer: ConsumerConfig {
                idle_window: Duration::from_secs(idle_window_secs),
                concurrency,
                ack_mode,
            },
        })
    }
}

/// Build the timer key a `schedule` invocation writes.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the namespace or identifier is empty,
/// or the delay overflows the instant unit.
pub fn timer_key(namespace: &str, id: &str, at: Option<i64>, delay_secs: u64, unit: InstantUnit) -> Result<TimerKey> {
    let namespace = required("namespace", namespace)?;
    let id = required("id", id)?;

    let expires_at = match at {
        Some(at) => at,
        None => {
            let delay = i64::try_from(delay_secs)
                .ok()
                .and_then(chrono::TimeDelta::try_seconds)
                .ok_or_else(|| Error::configuration("delay", "out of range"))?;
            let when = Utc::now()
                .checked_add_signed(delay)
                .ok_or_else(|| Error::configuration("delay", "out of range"))?;
            unit.of(when)
        }
    };

    Ok(TimerKey::new(namespace, id, expires_at))
}
