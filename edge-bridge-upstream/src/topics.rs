//! IoT-hub MQTT topic builders and parsers.

use bytes::Bytes;
use edge_bridge_sdk::{CloudError, CloudMessage, CloudResult, Identity};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const TWIN_RESPONSE_SUB: &str = "$iothub/twin/res/#";
pub const TWIN_DESIRED_SUB: &str = "$iothub/twin/PATCH/properties/desired/#";
pub const METHODS_SUB: &str = "$iothub/methods/POST/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHODS_PREFIX: &str = "$iothub/methods/POST/";
const DEVICEBOUND: &str = "/messages/devicebound/";

/// Property bag keys of the system properties
const MESSAGE_ID_KEY: &str = "$.mid";
const CORRELATION_ID_KEY: &str = "$.cid";
const CONTENT_TYPE_KEY: &str = "$.ct";
const CONTENT_ENCODING_KEY: &str = "$.ce";

/// Characters kept verbatim in property bags
const PROPERTY_BAG: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'$')
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Topic builder for dynamic topic construction
pub struct Topics;

impl Topics {
    fn identity_prefix(identity: &Identity) -> String {
        match identity.module_id() {
            Some(module_id) => format!("devices/{}/modules/{}", identity.device_id(), module_id),
            None => format!("devices/{}", identity.device_id()),
        }
    }

    /// Telemetry topic carrying the message properties in the property bag
    pub fn telemetry(identity: &Identity, message: &CloudMessage) -> String {
        format!(
            "{}/messages/events/{}",
            Self::identity_prefix(identity),
            encode_property_bag(message)
        )
    }

    pub fn c2d_sub(identity: &Identity) -> String {
        format!("devices/{}/messages/devicebound/#", identity.device_id())
    }

    pub fn twin_get(rid: &str) -> String {
        format!("$iothub/twin/GET/?$rid={rid}")
    }

    pub fn twin_reported_patch(rid: &str) -> String {
        format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
    }

    pub fn method_response(status: i32, rid: &str) -> String {
        format!("$iothub/methods/res/{status}/?$rid={rid}")
    }
}

/// Parsed `$iothub/twin/res/{status}/?$rid={rid}[&$version={v}]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinResponseTopic {
    pub status: u16,
    pub rid: String,
    pub version: Option<i64>,
}

pub fn parse_twin_response(topic: &str) -> Option<TwinResponseTopic> {
    let rest = topic.strip_prefix(TWIN_RESPONSE_PREFIX)?;
    let (status, query) = rest.split_once('/')?;
    let status = status.parse().ok()?;
    let rid = query_param(query, "$rid")?.to_string();
    let version = query_param(query, "$version").and_then(|v| v.parse().ok());
    Some(TwinResponseTopic {
        status,
        rid,
        version,
    })
}

/// Method name and request id of `$iothub/methods/POST/{name}/?$rid={rid}`
pub fn parse_method_request(topic: &str) -> Option<(String, String)> {
    let rest = topic.strip_prefix(METHODS_PREFIX)?;
    let (name, query) = rest.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    let rid = query_param(query, "$rid")?;
    Some((name.to_string(), rid.to_string()))
}

/// `$version` of a desired property notification topic
pub fn parse_desired_version(topic: &str) -> Option<i64> {
    let query = topic.strip_prefix(TWIN_DESIRED_PREFIX)?;
    query_param(query, "$version")?.parse().ok()
}

/// Build the cloud-to-device message of a devicebound publish
pub fn parse_c2d_message(topic: &str, payload: Bytes) -> CloudResult<CloudMessage> {
    let start = topic
        .find(DEVICEBOUND)
        .ok_or_else(|| CloudError::InvalidMessageFormat {
            reason: format!("not a cloud-to-device topic: {topic}"),
        })?;
    let bag = &topic[start + DEVICEBOUND.len()..];

    let mut message = CloudMessage {
        body: payload,
        ..Default::default()
    };
    for (key, value) in decode_property_bag(bag) {
        match key.as_str() {
            MESSAGE_ID_KEY => message.message_id = Some(value),
            CORRELATION_ID_KEY => message.correlation_id = Some(value),
            CONTENT_TYPE_KEY => message.content_type = Some(value),
            CONTENT_ENCODING_KEY => message.content_encoding = Some(value),
            _ if key.starts_with("$.") || key.starts_with("iothub-") => {}
            _ => {
                message.properties.insert(key, value);
            }
        }
    }
    // MQTT has no lock tokens; feedback refers to the message id
    message.lock_token = message.message_id.clone();
    Ok(message)
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .strip_prefix('?')
        .unwrap_or(query)
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn encode(component: &str) -> String {
    utf8_percent_encode(component, PROPERTY_BAG).to_string()
}

fn encode_property_bag(message: &CloudMessage) -> String {
    let system = [
        (MESSAGE_ID_KEY, &message.message_id),
        (CORRELATION_ID_KEY, &message.correlation_id),
        (CONTENT_TYPE_KEY, &message.content_type),
        (CONTENT_ENCODING_KEY, &message.content_encoding),
    ];
    let system = system
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|value| (key, value)));
    let application = message
        .properties
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()));

    system
        .chain(application)
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_property_bag(bag: &str) -> Vec<(String, String)> {
    bag.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_decode_str(key).decode_utf8_lossy().into_owned(),
                percent_decode_str(value).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}
