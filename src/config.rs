//! Gateway configuration.
//!
//! ```ignore
//! let config = BridgeConfig::from_json(r#"{"timeout": 2.5, "lock_release": "on_completion"}"#)?;
//! let bridge = Bridge::builder().path("db.json").config(config).open().await?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::LockRelease;

/// Default bound on a single store call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing and locking policy of a gateway. Durations are written in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bound on each offloaded store call.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Bound on waiting for the resource lock; unbounded when absent.
    #[serde(with = "opt_secs")]
    pub lock_timeout: Option<Duration>,
    /// When the resource lock is released after a call times out.
    pub lock_release: LockRelease,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            timeout: DEFAULT_TIMEOUT,
            lock_timeout: None,
            lock_release: LockRelease::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::secs::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        struct Secs(#[serde(with = "super::secs")] Duration);

        Ok(Option::<Secs>::deserialize(deserializer)?.map(|Secs(d)| d))
    }
}
