use crate::{
    cloud::model::{CloudMessage, Twin, TwinCollection},
    CloudResult, Message,
};
use std::sync::Arc;

/// Bidirectional conversion between [`Message`] and a wire type `W`
pub trait MessageConverter<W>: Send + Sync {
    fn to_message(&self, source: &W) -> CloudResult<Message>;

    fn from_message(&self, message: &Message) -> CloudResult<W>;
}

/// Resolves the converter registered for wire type `W`
pub trait ProvidesConverter<W> {
    fn converter(&self) -> &dyn MessageConverter<W>;
}

/// Converters for every upstream wire type, shared by proxies and receivers
#[derive(Clone)]
pub struct MessageConverterProvider {
    message: Arc<dyn MessageConverter<CloudMessage>>,
    twin: Arc<dyn MessageConverter<Twin>>,
    twin_collection: Arc<dyn MessageConverter<TwinCollection>>,
}

impl MessageConverterProvider {
    pub fn new(
        message: Arc<dyn MessageConverter<CloudMessage>>,
        twin: Arc<dyn MessageConverter<Twin>>,
        twin_collection: Arc<dyn MessageConverter<TwinCollection>>,
    ) -> Self {
        Self {
            message,
            twin,
            twin_collection,
        }
    }

    /// Converter for wire type `W`
    #[inline]
    pub fn get<W>(&self) -> &dyn MessageConverter<W>
    where
        Self: ProvidesConverter<W>,
    {
        ProvidesConverter::<W>::converter(self)
    }
}

impl ProvidesConverter<CloudMessage> for MessageConverterProvider {
    fn converter(&self) -> &dyn MessageConverter<CloudMessage> {
        self.message.as_ref()
    }
}

impl ProvidesConverter<Twin> for MessageConverterProvider {
    fn converter(&self) -> &dyn MessageConverter<Twin> {
        self.twin.as_ref()
    }
}

impl ProvidesConverter<TwinCollection> for MessageConverterProvider {
    fn converter(&self) -> &dyn MessageConverter<TwinCollection> {
        self.twin_collection.as_ref()
    }
}
