use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, time::Duration};

/// Upstream wire representation of a telemetry or cloud-to-device message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudMessage {
    pub body: Bytes,
    pub properties: BTreeMap<String, String>,
    pub message_id: Option<String>,
    /// Token the hub expects back in complete/abandon/reject
    pub lock_token: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub enqueued_time: Option<DateTime<Utc>>,
}

/// A set of twin properties (desired, reported or a patch of either)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TwinCollection(pub Map<String, Value>);

impl TwinCollection {
    pub const VERSION_KEY: &'static str = "$version";

    /// `$version` of the collection, when the hub supplied one
    #[inline]
    pub fn version(&self) -> Option<i64> {
        self.0.get(Self::VERSION_KEY).and_then(Value::as_i64)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Twin document as returned by the hub
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    #[serde(default)]
    pub desired: TwinCollection,
    #[serde(default)]
    pub reported: TwinCollection,
}

/// Direct method invocation received from the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    pub name: String,
    /// Correlation id assigned by the hub
    pub request_id: String,
    pub payload: Bytes,
}

/// Answer sent back to the hub for a [`MethodRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: i32,
    pub payload: Bytes,
}

/// Direct method invocation routed to a local device or module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMethodRequest {
    pub correlation_id: String,
    /// Identity string of the device/module the call is addressed to
    pub target_id: String,
    pub method_name: String,
    pub payload: Bytes,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

impl DirectMethodRequest {
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(0);

    pub fn new(
        correlation_id: impl Into<String>,
        target_id: impl Into<String>,
        method_name: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            target_id: target_id.into(),
            method_name: method_name.into(),
            payload: payload.into(),
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Result of a [`DirectMethodRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMethodResponse {
    pub correlation_id: String,
    pub http_status_code: u16,
    /// Status returned by the device method implementation
    pub status: i32,
    pub data: Bytes,
    pub error: Option<String>,
}

impl DirectMethodResponse {
    /// Response produced by the device method
    pub fn from_device(correlation_id: impl Into<String>, status: i32, data: impl Into<Bytes>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            http_status_code: 200,
            status,
            data: data.into(),
            error: None,
        }
    }

    /// Failure produced by the bridge before or instead of the device answering
    pub fn from_error(
        correlation_id: impl Into<String>,
        http_status_code: u16,
        error: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            http_status_code,
            status: 0,
            data: Bytes::new(),
            error: Some(error.into()),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.http_status_code)
    }
}
