use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use indexmap::IndexMap;

use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};

use serde::Deserialize;

use tokio::time::{Instant, timeout_at};

use tracing::{debug, info, warn};

use crate::client::{bridge_name, parse};
use crate::config::TransportConfig;
use crate::device::{BridgeEndpoint, BridgeInfo, BridgeKind};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Api, Failure, Outcome, PathParams, Transport};

// Service type announced by bridges.
const SERVICE_TYPE: &str = "_bond._tcp.local.";

// Duration of the discovery process.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A bridge found on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBridge {
    /// Bridge identifier, taken from the service instance name.
    pub bond_id: String,
    /// Resolvable host name.
    pub hostname: String,
    /// IPv4 address.
    pub ip_address: Ipv4Addr,
}

impl DiscoveredBridge {
    /// Returns the host to use when connecting to the bridge.
    ///
    /// The IPv4 address is preferred over the host name, since the latter
    /// requires an `mDNS` resolver on the host system.
    #[must_use]
    pub fn host(&self) -> String {
        self.ip_address.to_string()
    }
}

/// The outcome of a token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// The bridge is unlocked and returned its token.
    Token(String),
    /// The bridge is locked: the token is returned only after its physical
    /// button has been pressed, or after a power cycle.
    Locked,
    /// The bridge could not be reached.
    Failed,
}

/// The outcome of a bridge information request.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeInfoStatus {
    /// The token has been accepted and the bridge returned its information.
    Info(BridgeInfo),
    /// The bridge rejected the token.
    BadToken,
    /// The bridge could not be reached.
    Failed,
}

#[derive(Deserialize)]
struct TokenResponse {
    locked: i64,
    #[serde(default)]
    token: Option<String>,
}

/// A service for discovering all bridges within a network and acquiring
/// their credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    service_type: String,
    timeout: Duration,
    disable_ipv6: bool,
    disable_ip: Vec<IpAddr>,
    disable_network_interface: Vec<String>,
    transport: TransportConfig,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(SERVICE_TYPE)
    }
}

impl Discovery {
    /// Creates a [`Discovery`] for the given service type.
    ///
    /// Bridges announce themselves as `_bond._tcp.local.`, which is also
    /// the service type of [`Discovery::default`].
    #[must_use]
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            timeout: DISCOVERY_TIMEOUT,
            disable_ipv6: false,
            disable_ip: Vec::new(),
            disable_network_interface: Vec::new(),
            transport: TransportConfig::new(),
        }
    }

    /// Sets the duration of the discovery process.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables `IPv6` interfaces.
    #[must_use]
    pub const fn disable_ipv6(mut self) -> Self {
        self.disable_ipv6 = true;
        self
    }

    /// Disables the network interface with the given address.
    #[must_use]
    pub fn disable_ip(mut self, ip: impl Into<IpAddr>) -> Self {
        self.disable_ip.push(ip.into());
        self
    }

    /// Disables the network interface with the given name.
    #[must_use]
    pub fn disable_network_interface(mut self, name: impl Into<String>) -> Self {
        self.disable_network_interface.push(name.into());
        self
    }

    /// Sets the [`TransportConfig`] used for the token and bridge
    /// information requests.
    #[must_use]
    pub const fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the service type.
    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Browses the network for bridges until the discovery timeout expires.
    ///
    /// Each bridge is reported once, even if it answers more than once.
    /// An empty list is not an error: the caller decides whether to retry.
    ///
    /// # Errors
    ///
    /// An error is returned if the `mDNS` daemon cannot be started,
    /// configured or stopped.
    pub async fn discover(&self) -> Result<Vec<DiscoveredBridge>> {
        let mdns = ServiceDaemon::new()?;

        if self.disable_ipv6 {
            mdns.disable_interface(IfKind::IPv6)?;
        }

        for ip in &self.disable_ip {
            mdns.disable_interface(IfKind::Addr(*ip))?;
        }

        for name in &self.disable_network_interface {
            mdns.disable_interface(IfKind::Name(name.clone()))?;
        }

        let receiver = mdns.browse(&self.service_type)?;

        let mut bridges = IndexMap::new();
        let deadline = Instant::now() + self.timeout;
        loop {
            let event = match timeout_at(deadline, receiver.recv_async()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!("Discovery channel closed: {e}");
                    break;
                }
                Ok(Ok(event)) => event,
            };

            let ServiceEvent::ServiceResolved(service) = event else {
                continue;
            };

            let Some(bond_id) = instance_name(&service.fullname, &self.service_type) else {
                warn!("Skip service `{}`: unexpected name", service.fullname);
                continue;
            };

            let Some(ip_address) = service
                .get_addresses_v4()
                .into_iter()
                .map(|ip| Ipv4Addr::from(ip.octets()))
                .min()
            else {
                warn!("Skip bridge `{bond_id}`: no IPv4 address");
                continue;
            };

            debug!("Bridge `{bond_id}` found at {ip_address}");

            let _ = bridges.insert(
                bond_id.to_owned(),
                DiscoveredBridge {
                    bond_id: bond_id.to_owned(),
                    hostname: service.host.clone(),
                    ip_address,
                },
            );
        }

        mdns.stop_browse(&self.service_type)?;
        let _ = mdns.shutdown()?;

        info!("Discovered {} bridge(s)", bridges.len());

        Ok(bridges.into_values().collect())
    }

    /// Requests the token of the bridge at the given host.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only, such as a response
    /// with an unexpected format.
    pub async fn fetch_bridge_token(&self, host: &str) -> Result<TokenStatus> {
        let transport = Transport::unauthenticated(host, &self.transport)?;

        let body = match transport
            .call(&Api::BRIDGE_TOKEN, PathParams::NONE, None)
            .await?
        {
            Outcome::Body { body, .. } => body,
            Outcome::Empty { .. } => {
                warn!("Bridge `{host}` returned an empty token response");
                return Ok(TokenStatus::Failed);
            }
            Outcome::SoftFailure(_) => return Ok(TokenStatus::Failed),
        };

        let response: TokenResponse = parse(body, "token response")?;
        if response.locked != 0 {
            info!("Bridge `{host}` is locked");
            return Ok(TokenStatus::Locked);
        }

        response.token.map(TokenStatus::Token).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Bridge `{host}` is unlocked but returned no token"),
            )
        })
    }

    /// Requests the information of the bridge identified by the given
    /// [`BridgeEndpoint`], checking that its token is accepted.
    ///
    /// The version information does not require authentication on every
    /// firmware, so a second authenticated call validates the token: the
    /// bridge metadata for bridges, whose name is merged into the returned
    /// information, or the device list for "Smart by Bond" devices.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only, such as a response
    /// with an unexpected format.
    pub async fn fetch_bridge_info(&self, endpoint: &BridgeEndpoint) -> Result<BridgeInfoStatus> {
        let transport = Transport::new(endpoint, &self.transport)?;

        let mut info = match transport
            .call(&Api::BRIDGE_VERSION, PathParams::NONE, None)
            .await?
        {
            Outcome::Body { body, .. } => parse::<BridgeInfo>(body, "bridge version")?,
            Outcome::Empty { .. } => {
                warn!("Bridge `{}` returned an empty version", endpoint.host());
                return Ok(BridgeInfoStatus::Failed);
            }
            Outcome::SoftFailure(failure) => return Ok(Self::failure_status(endpoint, failure)),
        };

        match info.kind() {
            BridgeKind::Bridge => {
                match transport
                    .call(&Api::BRIDGE_METADATA, PathParams::NONE, None)
                    .await?
                {
                    Outcome::Body { body, .. } => {
                        if let Some(name) = bridge_name(&body) {
                            info.name = Some(name);
                        }
                    }
                    Outcome::Empty { .. } => {}
                    // Old firmware does not expose the bridge metadata.
                    Outcome::SoftFailure(Failure::Status(404)) => {
                        debug!("No metadata for bridge `{}`", endpoint.host());
                    }
                    Outcome::SoftFailure(failure) => {
                        return Ok(Self::failure_status(endpoint, failure));
                    }
                }
            }
            BridgeKind::SmartByBond => {
                if let Outcome::SoftFailure(failure) = transport
                    .call(&Api::DEVICE_LIST, PathParams::NONE, None)
                    .await?
                {
                    return Ok(Self::failure_status(endpoint, failure));
                }
            }
        }

        Ok(BridgeInfoStatus::Info(info))
    }

    fn failure_status(endpoint: &BridgeEndpoint, failure: Failure) -> BridgeInfoStatus {
        if failure.is_unauthorized() {
            warn!(
                "Bridge `{}` rejected the token `{}`: pair it again",
                endpoint.host(),
                endpoint.redacted_token()
            );
            BridgeInfoStatus::BadToken
        } else {
            BridgeInfoStatus::Failed
        }
    }
}

// Extracts the instance name from a full service name, for example
// `ZZBL12345` from `ZZBL12345._bond._tcp.local.`.
fn instance_name<'a>(fullname: &'a str, service_type: &str) -> Option<&'a str> {
    let service_type = service_type.trim_end_matches('.');
    fullname
        .trim_end_matches('.')
        .strip_suffix(service_type)?
        .strip_suffix('.')
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::{DISCOVERY_TIMEOUT, Discovery, DiscoveredBridge, SERVICE_TYPE, instance_name};

    pub(crate) fn configure_discovery() -> Discovery {
        Discovery::default()
            .timeout(Duration::from_secs(2))
            .disable_ipv6()
            .disable_network_interface("docker0")
    }

    #[test]
    fn discovery_builder() {
        let discovery = Discovery::default();
        assert_eq!(discovery.service_type(), SERVICE_TYPE);
        assert_eq!(discovery.timeout, DISCOVERY_TIMEOUT);

        let discovery = configure_discovery().disable_ip(Ipv4Addr::new(172, 17, 0, 1));
        assert!(discovery.disable_ipv6);
        assert_eq!(discovery.timeout, Duration::from_secs(2));
        assert_eq!(
            discovery.disable_ip,
            vec![IpAddr::V4(Ipv4Addr::new(172, 17, 0, 1))]
        );
        assert_eq!(discovery.disable_network_interface, vec!["docker0"]);
    }

    #[test]
    fn instance_names() {
        assert_eq!(
            instance_name("ZZBL12345._bond._tcp.local.", SERVICE_TYPE),
            Some("ZZBL12345")
        );
        assert_eq!(
            instance_name("KVPRBDJ45009._bond._tcp.local", SERVICE_TYPE),
            Some("KVPRBDJ45009")
        );
        assert_eq!(instance_name("._bond._tcp.local.", SERVICE_TYPE), None);
        assert_eq!(instance_name("ZZBL12345._http._tcp.local.", SERVICE_TYPE), None);
    }

    #[test]
    fn discovered_bridge_host() {
        let bridge = DiscoveredBridge {
            bond_id: "ZZBL12345".into(),
            hostname: "ZZBL12345.local.".into(),
            ip_address: Ipv4Addr::new(192, 168, 1, 50),
        };

        assert_eq!(bridge.host(), "192.168.1.50");
    }
}
