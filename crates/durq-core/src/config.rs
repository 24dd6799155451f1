//! Queue options: capacity bounds and protocol timings.
//!
//! Options deserialize from TOML; every field has a default, so an empty
//! document yields `QueueOptions::default()`.
//!
//! ```toml
//! max_items = 100
//! max_attempts = 8
//!
//! [timeouts]
//! ack_timer = 1000
//! reclaim_timeout = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol timings, all in milliseconds when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Heartbeat interval.
    #[serde(with = "millis")]
    pub ack_timer: Duration,
    /// Interval between reclaim scans.
    #[serde(with = "millis")]
    pub reclaim_timer: Duration,
    /// Heartbeat age after which a peer counts as abandoned.
    #[serde(with = "millis")]
    pub reclaim_timeout: Duration,
    /// Confirmation delay between handshake phases.
    #[serde(with = "millis")]
    pub reclaim_wait: Duration,
    /// Ceiling on retry backoff.
    #[serde(with = "millis")]
    pub max_queue_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ack_timer: Duration::from_millis(1_000),
            reclaim_timer: Duration::from_millis(3_000),
            reclaim_timeout: Duration::from_millis(10_000),
            reclaim_wait: Duration::from_millis(500),
            max_queue_delay: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Bound on both the queue and the in-progress set. Unbounded when `None`.
    pub max_items: Option<usize>,
    /// Highest attempt number still requeued; larger ones are discarded. Unbounded when `None`.
    pub max_attempts: Option<u32>,
    /// Base delay of the default quadratic backoff.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// A task firing later than `delay * late_factor` counts as late.
    pub late_factor: u32,
    pub timeouts: Timeouts,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_items: None,
            max_attempts: None,
            base_delay: Duration::from_millis(1_000),
            late_factor: 2,
            timeouts: Timeouts::default(),
        }
    }
}

impl QueueOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let options: QueueOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        let timers = [
            ("ack_timer", t.ack_timer),
            ("reclaim_timer", t.reclaim_timer),
            ("reclaim_timeout", t.reclaim_timeout),
            ("reclaim_wait", t.reclaim_wait),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if t.reclaim_timeout <= t.ack_timer {
            return Err(ConfigError::Invalid(format!(
                "reclaim_timeout ({:?}) must exceed ack_timer ({:?})",
                t.reclaim_timeout, t.ack_timer
            )));
        }
        if self.late_factor == 0 {
            return Err(ConfigError::Invalid("late_factor must be at least 1".to_string()));
        }
        if self.max_items == Some(0) {
            return Err(ConfigError::Invalid("max_items must be at least 1".to_string()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let options = QueueOptions::from_toml_str("").unwrap();
        assert_eq!(options, QueueOptions::default());
        assert_eq!(options.timeouts.reclaim_wait, Duration::from_millis(500));
        assert_eq!(options.max_items, None);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let options = QueueOptions::from_toml_str(
            r#"
            max_items = 100
            max_attempts = 8
            base_delay_ms = 250

            [timeouts]
            reclaim_timeout = 20000
            "#,
        )
        .unwrap();

        assert_eq!(options.max_items, Some(100));
        assert_eq!(options.max_attempts, Some(8));
        assert_eq!(options.base_delay, Duration::from_millis(250));
        assert_eq!(options.timeouts.reclaim_timeout, Duration::from_millis(20_000));
        assert_eq!(options.timeouts.ack_timer, Duration::from_millis(1_000));
    }

    #[test]
    fn reclaim_timeout_must_exceed_heartbeat() {
        let err = QueueOptions::from_toml_str(
            r#"
            [timeouts]
            ack_timer = 5000
            reclaim_timeout = 5000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_timer_is_rejected() {
        let err = QueueOptions::from_toml_str("[timeouts]\nreclaim_wait = 0\n").unwrap_err();
        assert!(err.to_string().contains("reclaim_wait"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = QueueOptions::from_toml_str("max_items = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
