use super::{
    proxy::{CloudProxy, CloudSessionProxy},
    DEFAULT_RECEIVE_TIMEOUT,
};
use dashmap::DashMap;
use edge_bridge_sdk::{
    CloudClientProvider, CloudResult, ConnectionStatus, ConnectionStatusChangeReason,
    ConnectionStatusHandler, Identity, MessageConverterProvider,
};
use futures::future::join_all;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the status event broadcast; slow subscribers lag, never block
const STATUS_CHANNEL_CAPACITY: usize = 64;

type ProxyMap = DashMap<Identity, Arc<CloudSessionProxy>>;

/// Connection status change of one identity's upstream session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatusEvent {
    pub identity: Identity,
    pub status: ConnectionStatus,
    pub reason: ConnectionStatusChangeReason,
}

/// Registry of cloud proxies, at most one active per identity.
///
/// Proxies are created lazily through the client provider. A proxy whose
/// credentials expired, or whose client reports a terminal disconnect, is
/// evicted so the next lookup builds a fresh one.
pub struct ConnectionManager {
    provider: Arc<dyn CloudClientProvider>,
    converters: MessageConverterProvider,
    receive_timeout: Duration,
    proxies: Arc<ProxyMap>,
    /// Serializes proxy creation so concurrent lookups cannot both create
    create_lock: Mutex<()>,
    status_tx: broadcast::Sender<ConnectionStatusEvent>,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn CloudClientProvider>, converters: MessageConverterProvider) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            provider,
            converters,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            proxies: Arc::new(DashMap::new()),
            create_lock: Mutex::new(()),
            status_tx,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Subscribe to status changes of every managed identity
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Active proxy of `identity`, if any
    pub fn get(&self, identity: &Identity) -> Option<Arc<CloudSessionProxy>> {
        self.proxies
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|proxy| proxy.is_active())
    }

    /// Identities with an active proxy, in no particular order
    pub fn active_identities(&self) -> Vec<Identity> {
        self.proxies
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Return the active proxy of `identity`, creating one if needed
    pub async fn get_or_create(&self, identity: &Identity) -> CloudResult<Arc<CloudSessionProxy>> {
        if let Some(proxy) = self.get(identity) {
            return Ok(proxy);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(proxy) = self.get(identity) {
            return Ok(proxy);
        }

        let client = self.provider.create(identity).await?;
        let proxy = Arc::new(
            CloudSessionProxy::new(
                identity.clone(),
                Arc::clone(&client),
                self.converters.clone(),
                Some(self.proxy_status_handler(identity.clone())),
            )
            .with_receive_timeout(self.receive_timeout),
        );
        client.set_connection_status_changed_handler(
            self.client_status_handler(identity.clone(), Arc::downgrade(&proxy)),
        );

        if let Some(stale) = self.proxies.insert(identity.clone(), Arc::clone(&proxy)) {
            debug!(%identity, active = stale.is_active(), "Replaced stale cloud proxy");
        }
        info!(%identity, "Created cloud proxy");
        Ok(proxy)
    }

    /// Close and forget the proxy of `identity`.
    ///
    /// Returns `false` when there was no proxy or its teardown failed.
    pub async fn close(&self, identity: &Identity) -> bool {
        match self.proxies.remove(identity) {
            Some((_, proxy)) => proxy.close().await,
            None => false,
        }
    }

    /// Close every proxy; returns how many closed cleanly
    pub async fn close_all(&self) -> usize {
        let identities: Vec<Identity> = self.proxies.iter().map(|e| e.key().clone()).collect();
        let results = join_all(identities.iter().map(|identity| self.close(identity))).await;
        let closed = results.into_iter().filter(|closed| *closed).count();
        info!(closed, "Closed all cloud proxies");
        closed
    }

    /// Status handler given to each proxy; runs after the proxy closed itself
    fn proxy_status_handler(&self, identity: Identity) -> ConnectionStatusHandler {
        let proxies = Arc::downgrade(&self.proxies);
        let status_tx = self.status_tx.clone();
        Arc::new(move |status, reason| {
            if status == ConnectionStatus::Disconnected
                && reason == ConnectionStatusChangeReason::ExpiredCredential
            {
                evict_inactive(&proxies, &identity);
            }
            publish(&status_tx, &identity, status, reason);
            Ok(())
        })
    }

    /// Status handler installed on each upstream client.
    ///
    /// Terminal disconnects close the proxy in the background and evict it.
    fn client_status_handler(
        &self,
        identity: Identity,
        proxy: Weak<CloudSessionProxy>,
    ) -> ConnectionStatusHandler {
        let proxies = Arc::downgrade(&self.proxies);
        let status_tx = self.status_tx.clone();
        Arc::new(move |status, reason| {
            publish(&status_tx, &identity, status, reason);
            if !is_terminal(status, reason) {
                return Ok(());
            }

            let Some(proxy) = proxy.upgrade() else {
                return Ok(());
            };
            let proxies = proxies.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                if !proxy.close().await {
                    warn!(%identity, "Cloud proxy teardown after disconnect failed");
                }
                evict_inactive(&proxies, &identity);
            });
            Ok(())
        })
    }
}

fn is_terminal(status: ConnectionStatus, reason: ConnectionStatusChangeReason) -> bool {
    match status {
        ConnectionStatus::Disabled => true,
        ConnectionStatus::Disconnected => matches!(
            reason,
            ConnectionStatusChangeReason::ExpiredCredential
                | ConnectionStatusChangeReason::BadCredential
                | ConnectionStatusChangeReason::DeviceDisabled
                | ConnectionStatusChangeReason::RetryExpired
        ),
        ConnectionStatus::Connected | ConnectionStatus::DisconnectedRetrying => false,
    }
}

/// Drop the mapping of `identity` only if the mapped proxy is closed, so a
/// replacement created in the meantime survives.
fn evict_inactive(proxies: &Weak<ProxyMap>, identity: &Identity) {
    let Some(proxies) = proxies.upgrade() else {
        return;
    };
    if proxies
        .remove_if(identity, |_, proxy| !proxy.is_active())
        .is_some()
    {
        info!(%identity, "Evicted closed cloud proxy");
    }
}

fn publish(
    status_tx: &broadcast::Sender<ConnectionStatusEvent>,
    identity: &Identity,
    status: ConnectionStatus,
    reason: ConnectionStatusChangeReason,
) {
    debug!(%identity, %status, %reason, "Cloud connection status changed");
    // No subscribers is fine
    let _ = status_tx.send(ConnectionStatusEvent {
        identity: identity.clone(),
        status,
        reason,
    });
}
