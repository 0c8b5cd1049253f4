use super::transport::AmqpMessage;
use bytes::Bytes;
use edge_bridge_sdk::{system_property, CloudResult, Message, MessageConverter};

/// Maps bridge messages onto link transfers.
///
/// The delivery tag is left empty; the sending handler assigns it.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpMessageConverter;

impl MessageConverter<AmqpMessage> for AmqpMessageConverter {
    fn to_message(&self, source: &AmqpMessage) -> CloudResult<Message> {
        let mut message = Message::new(source.body.clone());
        message.properties = source.application_properties.clone();
        let fields = [
            (system_property::MESSAGE_ID, &source.message_id),
            (system_property::CORRELATION_ID, &source.correlation_id),
            (system_property::CONTENT_TYPE, &source.content_type),
            (system_property::CONTENT_ENCODING, &source.content_encoding),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                message
                    .system_properties
                    .insert(key.to_string(), value.clone());
            }
        }
        Ok(message)
    }

    fn from_message(&self, message: &Message) -> CloudResult<AmqpMessage> {
        let owned = |key: &str| message.system_property(key).map(str::to_string);
        Ok(AmqpMessage {
            delivery_tag: Bytes::new(),
            body: message.body.clone(),
            application_properties: message.properties.clone(),
            message_id: owned(system_property::MESSAGE_ID),
            correlation_id: owned(system_property::CORRELATION_ID),
            content_type: owned(system_property::CONTENT_TYPE),
            content_encoding: owned(system_property::CONTENT_ENCODING),
        })
    }
}
