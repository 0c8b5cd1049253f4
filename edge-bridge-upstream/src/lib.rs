//! MQTT upstream client speaking the IoT-hub device/module topic conventions.

mod client;
mod config;
mod handlers;
mod mqtt;
mod provider;
mod supervisor;
mod topics;

pub use client::MqttCloudClient;
pub use config::UpstreamConfig;
pub use provider::MqttCloudClientProvider;
pub use supervisor::ConnectionState;
pub use topics::{Topics, TwinResponseTopic};
