use edge_bridge_sdk::RetryPolicy;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Upstream hub connection settings shared by every identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Hub host name, also part of the MQTT user name
    #[serde(default = "UpstreamConfig::default_host")]
    pub host: String,
    #[serde(default = "UpstreamConfig::default_port")]
    pub port: u16,
    /// Connect over TLS; requires `ca_path`
    #[serde(default)]
    pub tls: bool,
    /// CA certificate (PEM) trusted for the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "UpstreamConfig::default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default)]
    pub clean_session: bool,
    /// MQTT QoS level (0, 1, or 2) used for publishes and subscriptions
    #[serde(default = "UpstreamConfig::default_qos")]
    pub qos: u8,
    /// Twin request timeout in milliseconds
    #[serde(default = "UpstreamConfig::default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Wait of one cloud-to-device receive call in milliseconds
    #[serde(default = "UpstreamConfig::default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Cloud-to-device messages buffered per identity before new ones are dropped
    #[serde(default = "UpstreamConfig::default_c2d_queue_capacity")]
    pub c2d_queue_capacity: usize,
    /// `api-version` sent in the MQTT user name
    #[serde(default = "UpstreamConfig::default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl UpstreamConfig {
    fn default_host() -> String {
        "localhost".to_string()
    }

    fn default_port() -> u16 {
        1883
    }

    fn default_keep_alive_secs() -> u16 {
        60
    }

    fn default_qos() -> u8 {
        1
    }

    fn default_operation_timeout_ms() -> u64 {
        30_000
    }

    fn default_receive_timeout_ms() -> u64 {
        20_000
    }

    fn default_c2d_queue_capacity() -> usize {
        128
    }

    fn default_api_version() -> String {
        "2021-04-12".to_string()
    }

    /// Configured QoS; out-of-range values fall back to at-least-once
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    #[inline]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[inline]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            tls: false,
            ca_path: None,
            keep_alive_secs: Self::default_keep_alive_secs(),
            clean_session: false,
            qos: Self::default_qos(),
            operation_timeout_ms: Self::default_operation_timeout_ms(),
            receive_timeout_ms: Self::default_receive_timeout_ms(),
            c2d_queue_capacity: Self::default_c2d_queue_capacity(),
            api_version: Self::default_api_version(),
            retry_policy: RetryPolicy::default(),
        }
    }
}
