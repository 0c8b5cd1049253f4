use crate::cloud::proxy::CloudProxy;
use async_trait::async_trait;
use edge_bridge_sdk::CloudResult;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::debug;

/// What a local session subscribed to (or unsubscribed from)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionCategory {
    Methods,
    DesiredPropertyUpdates,
    C2D,
    TwinResponse,
    ModuleMessages,
}

/// Action applied to a cloud session when a local subscription changes
#[async_trait]
pub trait SubscriptionRegistration: Send + Sync {
    async fn process_subscription(&self, proxy: &dyn CloudProxy) -> CloudResult<()>;
}

/// Registration for a `(category, add)` pair.
///
/// Twin responses and module messages need nothing from the cloud session,
/// and the receive loop lives as long as the session, so those pairs (and
/// removing a C2D subscription) map to the null registration.
pub fn registration_for(
    category: SubscriptionCategory,
    add: bool,
) -> Arc<dyn SubscriptionRegistration> {
    match (category, add) {
        (SubscriptionCategory::Methods, add) => Arc::new(MethodSubscriptionRegistration::new(add)),
        (SubscriptionCategory::DesiredPropertyUpdates, add) => {
            Arc::new(DesiredPropertySubscriptionRegistration::new(add))
        }
        (SubscriptionCategory::C2D, true) => Arc::new(C2dSubscriptionRegistration),
        (SubscriptionCategory::C2D, false)
        | (SubscriptionCategory::TwinResponse, _)
        | (SubscriptionCategory::ModuleMessages, _) => NullSubscriptionRegistration::instance(),
    }
}

/// Installs or removes the direct method callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSubscriptionRegistration {
    add: bool,
}

impl MethodSubscriptionRegistration {
    pub fn new(add: bool) -> Self {
        Self { add }
    }

    #[inline]
    pub fn is_add(&self) -> bool {
        self.add
    }
}

#[async_trait]
impl SubscriptionRegistration for MethodSubscriptionRegistration {
    async fn process_subscription(&self, proxy: &dyn CloudProxy) -> CloudResult<()> {
        debug!(identity = %proxy.identity(), add = self.add, "Processing method subscription");
        if self.add {
            proxy.setup_call_method().await
        } else {
            proxy.remove_call_method().await
        }
    }
}

/// Installs or removes the desired property callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredPropertySubscriptionRegistration {
    add: bool,
}

impl DesiredPropertySubscriptionRegistration {
    pub fn new(add: bool) -> Self {
        Self { add }
    }

    #[inline]
    pub fn is_add(&self) -> bool {
        self.add
    }
}

#[async_trait]
impl SubscriptionRegistration for DesiredPropertySubscriptionRegistration {
    async fn process_subscription(&self, proxy: &dyn CloudProxy) -> CloudResult<()> {
        debug!(
            identity = %proxy.identity(),
            add = self.add,
            "Processing desired property subscription"
        );
        if self.add {
            proxy.setup_desired_property_update().await
        } else {
            proxy.remove_desired_property_update().await
        }
    }
}

/// Starts the cloud-to-device receive loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct C2dSubscriptionRegistration;

#[async_trait]
impl SubscriptionRegistration for C2dSubscriptionRegistration {
    async fn process_subscription(&self, proxy: &dyn CloudProxy) -> CloudResult<()> {
        debug!(identity = %proxy.identity(), "Processing C2D subscription");
        proxy.start_listening().await
    }
}

/// Registration that does nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullSubscriptionRegistration;

static NULL_REGISTRATION: Lazy<Arc<NullSubscriptionRegistration>> =
    Lazy::new(|| Arc::new(NullSubscriptionRegistration));

impl NullSubscriptionRegistration {
    /// Process-wide shared instance
    pub fn instance() -> Arc<dyn SubscriptionRegistration> {
        NULL_REGISTRATION.clone()
    }
}

#[async_trait]
impl SubscriptionRegistration for NullSubscriptionRegistration {
    async fn process_subscription(&self, _proxy: &dyn CloudProxy) -> CloudResult<()> {
        Ok(())
    }
}
