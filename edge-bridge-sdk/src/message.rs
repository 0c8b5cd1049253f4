use bytes::Bytes;
use std::collections::BTreeMap;

/// Well-known keys of [`Message::system_properties`]
pub mod system_property {
    pub const MESSAGE_ID: &str = "messageId";
    pub const LOCK_TOKEN: &str = "lockToken";
    pub const CORRELATION_ID: &str = "correlationId";
    pub const CONTENT_TYPE: &str = "contentType";
    pub const CONTENT_ENCODING: &str = "contentEncoding";
    pub const ENQUEUED_TIME: &str = "enqueuedTime";
    pub const CONNECTION_DEVICE_ID: &str = "connectionDeviceId";
    pub const CONNECTION_MODULE_ID: &str = "connectionModuleId";
    pub const VERSION: &str = "version";
}

/// Protocol-neutral message exchanged between local sessions and the cloud.
///
/// The body is opaque to the bridge; application properties are carried
/// verbatim and system properties hold the well-known metadata above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    pub properties: BTreeMap<String, String>,
    pub system_properties: BTreeMap<String, String>,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_system_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.system_properties.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties.get(key).map(String::as_str)
    }

    #[inline]
    pub fn message_id(&self) -> Option<&str> {
        self.system_property(system_property::MESSAGE_ID)
    }

    #[inline]
    pub fn lock_token(&self) -> Option<&str> {
        self.system_property(system_property::LOCK_TOKEN)
    }
}
