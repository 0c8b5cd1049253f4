pub mod cloud;
mod converter;
mod error;
mod identity;
mod message;
pub mod mqtt;
mod retry;

pub type CloudResult<T> = Result<T, CloudError>;

pub use cloud::{
    model::{
        CloudMessage, DirectMethodRequest, DirectMethodResponse, MethodRequest, MethodResponse,
        Twin, TwinCollection,
    },
    types::{ConnectionStatus, ConnectionStatusChangeReason, FeedbackStatus, QualityOfService},
    BoxFuture, CloudClient, CloudClientProvider, CloudListener, ConnectionStatusHandler,
    DesiredPropertyCallback, MethodCallback,
};
pub use converter::{MessageConverter, MessageConverterProvider, ProvidesConverter};
pub use error::CloudError;
pub use identity::Identity;
pub use message::{system_property, Message};
pub use retry::{build_exponential_backoff, RetryPolicy};
