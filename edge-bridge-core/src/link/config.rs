use edge_bridge_sdk::QualityOfService;
use serde::Deserialize;
use std::time::Duration;

/// Settings of the links attached to cloud sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub qos: QualityOfService,
    #[serde(default = "LinkConfig::open_timeout_ms_default")]
    pub open_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            qos: QualityOfService::default(),
            open_timeout_ms: LinkConfig::open_timeout_ms_default(),
        }
    }
}

impl LinkConfig {
    fn open_timeout_ms_default() -> u64 {
        10_000
    }

    #[inline]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}
