use super::config::UpstreamConfig;
use edge_bridge_sdk::{CloudError, CloudResult, Identity};
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use std::time::Duration;

/// Shortest keep-alive rumqttc accepts
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Build the MQTT options of one identity.
///
/// The hub expects:
/// - client id `device` or `device/module`
/// - user name `{host}/{device}[/{module}]/?api-version={version}`
/// - the SAS token as password
///
/// Options are rebuilt into a fresh client on every supervisor attempt.
pub(super) fn mqtt_options(
    config: &UpstreamConfig,
    identity: &Identity,
    sas_token: Option<&str>,
) -> CloudResult<MqttOptions> {
    let mut options = MqttOptions::new(identity.to_string(), config.host.as_str(), config.port);

    options.set_credentials(user_name(config, identity), sas_token.unwrap_or_default());
    options.set_keep_alive(Duration::from_secs(
        (config.keep_alive_secs as u64).max(MIN_KEEP_ALIVE_SECS),
    ));
    options.set_clean_session(config.clean_session);

    if config.tls {
        let ca_path = config
            .ca_path
            .as_ref()
            .ok_or_else(|| CloudError::InvalidArgument {
                name: "upstream.ca_path".to_string(),
                reason: "required when tls is enabled".to_string(),
            })?;
        let ca = std::fs::read(ca_path).map_err(|e| CloudError::InvalidArgument {
            name: "upstream.ca_path".to_string(),
            reason: format!("failed to read {}: {e}", ca_path.display()),
        })?;
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }

    Ok(options)
}

#[inline]
fn user_name(config: &UpstreamConfig, identity: &Identity) -> String {
    format!(
        "{}/{}/?api-version={}",
        config.host, identity, config.api_version
    )
}
