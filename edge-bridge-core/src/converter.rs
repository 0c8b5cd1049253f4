use chrono::{DateTime, SecondsFormat, Utc};
use edge_bridge_sdk::{
    system_property, CloudError, CloudMessage, CloudResult, Message, MessageConverter,
    MessageConverterProvider, Twin, TwinCollection,
};
use serde_json::Value;
use std::sync::Arc;

/// Converter set used by the bridge unless a caller supplies its own
pub fn default_converter_provider() -> MessageConverterProvider {
    MessageConverterProvider::new(
        Arc::new(CloudMessageConverter),
        Arc::new(TwinMessageConverter),
        Arc::new(TwinCollectionMessageConverter),
    )
}

/// Maps telemetry and cloud-to-device messages onto [`CloudMessage`].
///
/// Application properties are copied verbatim; the well-known system
/// properties map onto the dedicated fields of the wire type.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudMessageConverter;

impl MessageConverter<CloudMessage> for CloudMessageConverter {
    fn to_message(&self, source: &CloudMessage) -> CloudResult<Message> {
        let mut message = Message::new(source.body.clone());
        message.properties = source.properties.clone();

        let system = &mut message.system_properties;
        let fields = [
            (system_property::MESSAGE_ID, &source.message_id),
            (system_property::LOCK_TOKEN, &source.lock_token),
            (system_property::CORRELATION_ID, &source.correlation_id),
            (system_property::CONTENT_TYPE, &source.content_type),
            (system_property::CONTENT_ENCODING, &source.content_encoding),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                system.insert(key.to_string(), value.clone());
            }
        }
        if let Some(enqueued) = source.enqueued_time {
            system.insert(
                system_property::ENQUEUED_TIME.to_string(),
                enqueued.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        }
        Ok(message)
    }

    fn from_message(&self, message: &Message) -> CloudResult<CloudMessage> {
        let owned = |key: &str| message.system_property(key).map(str::to_string);
        let enqueued_time = match message.system_property(system_property::ENQUEUED_TIME) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| CloudError::InvalidMessageFormat {
                        reason: format!("invalid enqueued time '{raw}': {e}"),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(CloudMessage {
            body: message.body.clone(),
            properties: message.properties.clone(),
            message_id: owned(system_property::MESSAGE_ID),
            lock_token: owned(system_property::LOCK_TOKEN),
            correlation_id: owned(system_property::CORRELATION_ID),
            content_type: owned(system_property::CONTENT_TYPE),
            content_encoding: owned(system_property::CONTENT_ENCODING),
            enqueued_time,
        })
    }
}

/// Full twin document <-> JSON message body
#[derive(Debug, Default, Clone, Copy)]
pub struct TwinMessageConverter;

impl MessageConverter<Twin> for TwinMessageConverter {
    fn to_message(&self, source: &Twin) -> CloudResult<Message> {
        let body = serde_json::to_vec(source)?;
        let mut message = Message::new(body)
            .with_system_property(system_property::CONTENT_TYPE, "application/json");
        message.system_properties.insert(
            system_property::ENQUEUED_TIME.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        if let Some(version) = source.reported.version() {
            message
                .system_properties
                .insert(system_property::VERSION.to_string(), version.to_string());
        }
        Ok(message)
    }

    fn from_message(&self, message: &Message) -> CloudResult<Twin> {
        serde_json::from_slice(&message.body).map_err(|e| CloudError::InvalidMessageFormat {
            reason: format!("twin body is not a twin document: {e}"),
        })
    }
}

/// Twin property patch <-> JSON object message body
#[derive(Debug, Default, Clone, Copy)]
pub struct TwinCollectionMessageConverter;

impl MessageConverter<TwinCollection> for TwinCollectionMessageConverter {
    fn to_message(&self, source: &TwinCollection) -> CloudResult<Message> {
        let body = serde_json::to_vec(source)?;
        let mut message = Message::new(body)
            .with_system_property(system_property::CONTENT_TYPE, "application/json");
        if let Some(version) = source.version() {
            message
                .system_properties
                .insert(system_property::VERSION.to_string(), version.to_string());
        }
        Ok(message)
    }

    fn from_message(&self, message: &Message) -> CloudResult<TwinCollection> {
        let text =
            std::str::from_utf8(&message.body).map_err(|e| CloudError::InvalidMessageFormat {
                reason: format!("reported properties are not UTF-8: {e}"),
            })?;
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(TwinCollection(map)),
            Ok(other) => Err(CloudError::InvalidMessageFormat {
                reason: format!("reported properties must be a JSON object, got {}", kind(&other)),
            }),
            Err(e) => Err(CloudError::InvalidMessageFormat {
                reason: format!("reported properties are not valid JSON: {e}"),
            }),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
