use super::{client::MqttCloudClient, config::UpstreamConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use edge_bridge_sdk::{CloudClient, CloudClientProvider, CloudResult, Identity};
use std::sync::Arc;
use tracing::debug;

/// Creates one [`MqttCloudClient`] per identity from the shared upstream
/// settings and the SAS token registered for that identity.
pub struct MqttCloudClientProvider {
    config: Arc<UpstreamConfig>,
    credentials: DashMap<Identity, String>,
}

impl MqttCloudClientProvider {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config: Arc::new(config),
            credentials: DashMap::new(),
        }
    }

    pub fn with_credentials(
        self,
        credentials: impl IntoIterator<Item = (Identity, String)>,
    ) -> Self {
        for (identity, sas_token) in credentials {
            self.credentials.insert(identity, sas_token);
        }
        self
    }

    /// Register or replace the SAS token of `identity`.
    ///
    /// Takes effect for clients created afterwards.
    pub fn set_credentials(&self, identity: Identity, sas_token: impl Into<String>) {
        self.credentials.insert(identity, sas_token.into());
    }

    #[inline]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }
}

#[async_trait]
impl CloudClientProvider for MqttCloudClientProvider {
    async fn create(&self, identity: &Identity) -> CloudResult<Arc<dyn CloudClient>> {
        let sas_token = self
            .credentials
            .get(identity)
            .map(|entry| entry.value().clone());
        if sas_token.is_none() {
            debug!(identity = %identity, "No SAS token registered, connecting without password");
        }

        let client =
            MqttCloudClient::connect(identity.clone(), sas_token.as_deref(), Arc::clone(&self.config))
                .await?;
        Ok(client as Arc<dyn CloudClient>)
    }
}
