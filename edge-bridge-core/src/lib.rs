pub mod cloud;
mod converter;
pub mod link;
mod subscription;

pub use cloud::{
    manager::{ConnectionManager, ConnectionStatusEvent},
    proxy::{CloudProxy, CloudSessionProxy},
    receiver::CloudReceiver,
};
pub use converter::{
    default_converter_provider, CloudMessageConverter, TwinCollectionMessageConverter,
    TwinMessageConverter,
};
pub use subscription::{
    registration_for, C2dSubscriptionRegistration, DesiredPropertySubscriptionRegistration,
    MethodSubscriptionRegistration, NullSubscriptionRegistration, SubscriptionCategory,
    SubscriptionRegistration,
};
