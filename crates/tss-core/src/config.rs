//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::validate_parties;
use crate::{PartyId, Result, DEFAULT_PARTIES, DEFAULT_THRESHOLD};

/// Default per-ceremony deadline
pub const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest per-ceremony deadline accepted
pub const MAX_CEREMONY_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration shared by every ceremony a coordinator runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Cluster parties taking part in every ceremony
    pub parties: Vec<PartyId>,

    /// Threshold (t-of-n)
    pub threshold: u32,

    /// Deadline covering the trigger call and the result wait, in milliseconds on the wire
    #[serde(with = "duration_ms")]
    pub ceremony_timeout: Duration,

    /// Open the result subscription before sending the trigger.
    ///
    /// Off by default: a failed trigger then never opens a subscription, at
    /// the cost of losing results the cluster publishes before the
    /// subscription is attached.
    #[serde(default)]
    pub subscribe_before_trigger: bool,
}

impl CoordinatorConfig {
    /// Create a configuration with the default timeout
    pub fn new(parties: Vec<PartyId>, threshold: u32) -> Result<Self> {
        let config = Self {
            parties,
            threshold,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the per-ceremony deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ceremony_timeout = timeout;
        self
    }

    /// Subscribe before triggering
    pub fn with_subscribe_before_trigger(mut self, enabled: bool) -> Self {
        self.subscribe_before_trigger = enabled;
        self
    }

    /// Check the party set, threshold and timeout
    pub fn validate(&self) -> Result<()> {
        validate_parties(&self.parties, self.threshold)?;
        if self.ceremony_timeout.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "Ceremony timeout must be positive".into(),
            ));
        }
        if self.ceremony_timeout > MAX_CEREMONY_TIMEOUT {
            return Err(crate::Error::InvalidConfig(format!(
                "Ceremony timeout cannot exceed {}s",
                MAX_CEREMONY_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            parties: DEFAULT_PARTIES.to_vec(),
            threshold: DEFAULT_THRESHOLD,
            ceremony_timeout: DEFAULT_CEREMONY_TIMEOUT,
            subscribe_before_trigger: false,
        }
    }
}

mod duration_ms {
    use serde::{ser::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).map_err(S::Error::custom)?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
