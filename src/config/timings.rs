use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound on parallel status calls during a bulk refresh.
pub const MAX_REFRESH_CONCURRENCY: usize = 4;

// -----------------------------------------------------------------------------
// ----- LifecycleTimings ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    /// Status poll cadence while a pairing code is on screen.
    pub poll_interval: Duration,
    /// Seconds a pairing code stays valid before the flow expires.
    pub countdown_seconds: u32,
    pub refresh_interval: Duration,
    pub stale_check_interval: Duration,
    pub stale_threshold: Duration,
    pub gateway_timeout: Duration,
    pub refresh_concurrency: usize,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            countdown_seconds: 120,
            refresh_interval: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(30 * 60),
            gateway_timeout: Duration::from_secs(15),
            refresh_concurrency: 1,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- LifecycleTimings: Static ----------------------------------------------

impl LifecycleTimings {
    pub async fn from_file(path: &Path) -> Result<Self, TimingsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| TimingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    /// Parse the `[lifecycle]` table. Missing keys keep their defaults.
    pub fn parse(raw: &str) -> Result<Self, TimingsError> {
        let doc: TimingsFile = toml::from_str(raw).map_err(|e| TimingsError::Toml { source: e })?;
        let section = doc.lifecycle.unwrap_or_default();

        let mut timings = Self::default();

        if let Some(v) = section.poll_interval {
            timings.poll_interval = duration("poll_interval", &v)?;
        }
        if let Some(v) = section.countdown_seconds {
            timings.countdown_seconds = v;
        }
        if let Some(v) = section.refresh_interval {
            timings.refresh_interval = duration("refresh_interval", &v)?;
        }
        if let Some(v) = section.stale_check_interval {
            timings.stale_check_interval = duration("stale_check_interval", &v)?;
        }
        if let Some(v) = section.stale_threshold {
            timings.stale_threshold = duration("stale_threshold", &v)?;
        }
        if let Some(v) = section.gateway_timeout {
            timings.gateway_timeout = duration("gateway_timeout", &v)?;
        }
        if let Some(v) = section.refresh_concurrency {
            timings.refresh_concurrency = v;
        }

        timings.validate()?;
        Ok(timings)
    }
}

// -----------------------------------------------------------------------------
// ----- LifecycleTimings: Private ---------------------------------------------

impl LifecycleTimings {
    fn validate(&self) -> Result<(), TimingsError> {
        let durations = [
            ("poll_interval", self.poll_interval),
            ("refresh_interval", self.refresh_interval),
            ("stale_check_interval", self.stale_check_interval),
            ("stale_threshold", self.stale_threshold),
            ("gateway_timeout", self.gateway_timeout),
        ];

        for (field, value) in durations {
            if value.is_zero() {
                return Err(TimingsError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.countdown_seconds == 0 {
            return Err(TimingsError::Invalid {
                field: "countdown_seconds",
                reason: "must be at least 1".to_string(),
            });
        }

        if !(1..=MAX_REFRESH_CONCURRENCY).contains(&self.refresh_concurrency) {
            return Err(TimingsError::Invalid {
                field: "refresh_concurrency",
                reason: format!("must be between 1 and {MAX_REFRESH_CONCURRENCY}"),
            });
        }

        Ok(())
    }
}

fn duration(field: &'static str, value: &str) -> Result<Duration, TimingsError> {
    humantime::parse_duration(value).map_err(|e| TimingsError::Duration {
        field,
        value: value.to_string(),
        source: e,
    })
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct TimingsFile {
    #[serde(default)]
    lifecycle: Option<TimingsSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingsSection {
    poll_interval: Option<String>,
    countdown_seconds: Option<u32>,
    refresh_interval: Option<String>,
    stale_check_interval: Option<String>,
    stale_threshold: Option<String>,
    gateway_timeout: Option<String>,
    refresh_concurrency: Option<usize>,
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TimingsError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("invalid duration for {field}: {value:?}: {source}")]
    Duration {
        field: &'static str,
        value: String,
        source: humantime::DurationError,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        assert_eq!(LifecycleTimings::parse("").unwrap(), LifecycleTimings::default());
    }

    #[test]
    fn humantime_values_override_defaults() {
        let raw = r#"
            [lifecycle]
            poll_interval = "3s"
            stale_threshold = "45m"
            countdown_seconds = 90
            refresh_concurrency = 2
        "#;

        let t = LifecycleTimings::parse(raw).unwrap();
        assert_eq!(t.poll_interval, Duration::from_secs(3));
        assert_eq!(t.stale_threshold, Duration::from_secs(45 * 60));
        assert_eq!(t.countdown_seconds, 90);
        assert_eq!(t.refresh_concurrency, 2);
        assert_eq!(t.refresh_interval, Duration::from_secs(30));
    }

    #[test]
    fn concurrency_is_capped() {
        let raw = "[lifecycle]\nrefresh_concurrency = 16\n";
        let err = LifecycleTimings::parse(raw).unwrap_err();
        assert!(matches!(
            err,
            TimingsError::Invalid {
                field: "refresh_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let raw = "[lifecycle]\ngateway_timeout = \"soon\"\n";
        let err = LifecycleTimings::parse(raw).unwrap_err();
        assert!(err.to_string().starts_with("invalid duration for gateway_timeout"));
    }

    #[test]
    fn zero_durations_are_invalid() {
        let raw = "[lifecycle]\npoll_interval = \"0s\"\n";
        assert!(LifecycleTimings::parse(raw).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = "[lifecycle]\npoll_every = \"2s\"\n";
        assert!(matches!(
            LifecycleTimings::parse(raw),
            Err(TimingsError::Toml { .. })
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
