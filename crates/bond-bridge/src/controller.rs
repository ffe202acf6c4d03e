use std::borrow::Cow;

use hashbrown::HashMap;

use tokio::sync::mpsc::{self, Receiver, Sender};

use tracing::{error, info, warn};

use crate::client::RestClient;
use crate::config::{PushConfig, TransportConfig};
use crate::device::BridgeEndpoint;
use crate::discovery::{BridgeInfoStatus, DiscoveredBridge, Discovery, TokenStatus};
use crate::error::{Error, ErrorKind, Result};

// Number of state changes buffered by default before discarding new ones.
const STATE_BUFFER_SIZE: usize = 64;
use crate::push::{ChannelHandler, PushListener, StateHandler, StateUpdate};

fn controller_error(error: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Controller, error)
}

/// A bridge registered in a [`Controller`].
///
/// It pairs the [`RestClient`] of the bridge with its [`PushListener`], if
/// one has been started.
#[derive(Debug)]
pub struct Bridge {
    client: RestClient,
    listener: Option<PushListener>,
}

impl Bridge {
    /// Returns the [`RestClient`] of the bridge.
    #[must_use]
    pub const fn client(&self) -> &RestClient {
        &self.client
    }

    /// Returns the [`PushListener`] of the bridge, if one has been started.
    #[must_use]
    pub const fn listener(&self) -> Option<&PushListener> {
        self.listener.as_ref()
    }

    /// Checks whether the push session of the bridge is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(PushListener::is_alive)
    }

    /// Starts a [`PushListener`] delivering state changes to `handler`.
    ///
    /// A terminated listener is replaced by a new one. Returns `false`,
    /// without starting anything, if the current listener is still alive.
    pub fn listen<H: StateHandler>(&mut self, config: PushConfig, handler: H) -> bool {
        if self.is_listening() {
            return false;
        }

        self.listener = Some(PushListener::start(
            self.client.endpoint(),
            config,
            handler,
        ));
        true
    }

    /// Stops the push session of the bridge, if any.
    pub fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }
}

/// A controller for interacting with bridges.
///
/// The main functionalities include:
///
/// - Discovering bridges on the network and acquiring their tokens.
/// - Registering one [`Bridge`] per [`BridgeEndpoint`], so that a bridge is
///   driven by a single [`RestClient`] and at most one [`PushListener`].
/// - Starting push listeners for all bridges and gathering their state
///   changes into a single receiver, owned by the controller until
///   [`Controller::take_state_receiver`] hands it over.
///
/// A push session is never restarted automatically: calling
/// [`Controller::start_push_listeners`] again replaces the terminated
/// listeners, which lets the owner apply its own reconnection policy.
/// Replaced listeners keep sending to the same receiver.
#[derive(Debug)]
pub struct Controller {
    discovery: Discovery,
    transport: TransportConfig,
    push: PushConfig,
    bridges: HashMap<BridgeEndpoint, Bridge>,
    state_sender: Sender<StateUpdate>,
    state_receiver: Option<Receiver<StateUpdate>>,
}

impl Controller {
    /// Creates a [`Controller`] from a [`Discovery`] configuration.
    #[must_use]
    #[inline]
    pub fn new(discovery: Discovery) -> Self {
        let (state_sender, state_receiver) = mpsc::channel(STATE_BUFFER_SIZE);
        Self {
            discovery,
            transport: TransportConfig::new(),
            push: PushConfig::new(),
            bridges: HashMap::new(),
            state_sender,
            state_receiver: Some(state_receiver),
        }
    }

    /// Defines the [`TransportConfig`] of the bridges [`RestClient`]s.
    #[must_use]
    #[inline]
    pub const fn transport_config(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Defines the [`PushConfig`] of the bridges [`PushListener`]s.
    #[must_use]
    #[inline]
    pub const fn push_config(mut self, push: PushConfig) -> Self {
        self.push = push;
        self
    }

    /// Defines how many state changes the state receiver can hold. When it
    /// is full, new state changes are discarded.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    #[must_use]
    pub fn state_buffer_size(mut self, buffer_size: usize) -> Self {
        let (state_sender, state_receiver) = mpsc::channel(buffer_size);
        self.state_sender = state_sender;
        self.state_receiver = Some(state_receiver);
        self
    }

    /// Returns the [`Discovery`] configuration.
    #[must_use]
    pub const fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Discovers the bridges available on the network.
    ///
    /// Discovered bridges are not registered: their token must be acquired
    /// first, for example through [`Controller::pair`].
    ///
    /// # Errors
    ///
    /// An error is returned if the discovery process cannot run.
    #[inline]
    pub async fn discover(&self) -> Result<Vec<DiscoveredBridge>> {
        self.discovery.discover().await
    }

    /// Acquires the token of a discovered bridge, validates it, and registers
    /// the bridge.
    ///
    /// Returns `None` if the bridge is locked, unreachable, or rejects its own
    /// token.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only.
    pub async fn pair(&mut self, bridge: &DiscoveredBridge) -> Result<Option<BridgeEndpoint>> {
        let host = bridge.host();

        let token = match self.discovery.fetch_bridge_token(&host).await? {
            TokenStatus::Token(token) => token,
            TokenStatus::Locked => {
                warn!(
                    "Bridge `{}` is locked: press its button and pair it again",
                    bridge.bond_id
                );
                return Ok(None);
            }
            TokenStatus::Failed => {
                warn!("Impossible to reach bridge `{}`", bridge.bond_id);
                return Ok(None);
            }
        };

        let endpoint = BridgeEndpoint::new(host, token);
        match self.discovery.fetch_bridge_info(&endpoint).await? {
            BridgeInfoStatus::Info(info) => {
                info!(
                    "Paired bridge `{}` ({})",
                    bridge.bond_id,
                    info.name.as_deref().unwrap_or("unnamed")
                );
            }
            BridgeInfoStatus::BadToken | BridgeInfoStatus::Failed => return Ok(None),
        }

        let _ = self.add_bridge(endpoint.clone())?;
        Ok(Some(endpoint))
    }

    /// Registers the bridge identified by the given [`BridgeEndpoint`].
    ///
    /// Registering an endpoint twice returns the existing [`Bridge`].
    ///
    /// # Errors
    ///
    /// An error is returned if the [`RestClient`] cannot be built.
    pub fn add_bridge(&mut self, endpoint: BridgeEndpoint) -> Result<&mut Bridge> {
        if !self.bridges.contains_key(&endpoint) {
            let client = RestClient::new(endpoint.clone(), self.transport)?;
            let _ = self.bridges.insert(
                endpoint.clone(),
                Bridge {
                    client,
                    listener: None,
                },
            );
        }

        self.bridge_mut(&endpoint)
    }

    /// Removes a bridge, stopping its push session.
    pub fn remove_bridge(&mut self, endpoint: &BridgeEndpoint) -> Option<Bridge> {
        let mut bridge = self.bridges.remove(endpoint)?;
        bridge.stop_listening();
        Some(bridge)
    }

    /// Returns the [`Bridge`] identified by the given [`BridgeEndpoint`].
    ///
    /// # Errors
    ///
    /// An error is returned if the bridge is not registered.
    pub fn bridge(&self, endpoint: &BridgeEndpoint) -> Result<&Bridge> {
        self.bridges
            .get(endpoint)
            .ok_or_else(|| missing_bridge(endpoint))
    }

    /// Returns a mutable reference to the [`Bridge`] identified by the given
    /// [`BridgeEndpoint`].
    ///
    /// # Errors
    ///
    /// An error is returned if the bridge is not registered.
    pub fn bridge_mut(&mut self, endpoint: &BridgeEndpoint) -> Result<&mut Bridge> {
        self.bridges
            .get_mut(endpoint)
            .ok_or_else(|| missing_bridge(endpoint))
    }

    /// Returns an iterator over the registered bridges.
    pub fn bridges(&self) -> impl Iterator<Item = (&BridgeEndpoint, &Bridge)> {
        self.bridges.iter()
    }

    /// Starts push listeners for all registered bridges whose push session
    /// is not running, and returns how many have been started.
    ///
    /// Every listener, including those replacing terminated ones, sends its
    /// state changes to the single receiver returned by
    /// [`Controller::take_state_receiver`].
    ///
    /// # Errors
    ///
    /// An error is returned if no bridge is registered.
    pub fn start_push_listeners(&mut self) -> Result<usize> {
        if self.bridges.is_empty() {
            return Err(controller_error("No bridges registered"));
        }

        let mut started_count = 0;
        for (endpoint, bridge) in &mut self.bridges {
            let handler = ChannelHandler::new(endpoint.host(), self.state_sender.clone());
            if bridge.listen(self.push, handler) {
                started_count += 1;
            }
        }

        info!("Started {started_count} push listener(s)");

        Ok(started_count)
    }

    /// Takes the receiver of the state changes of all bridges.
    ///
    /// Returns `None` if the receiver has already been taken.
    pub fn take_state_receiver(&mut self) -> Option<Receiver<StateUpdate>> {
        self.state_receiver.take()
    }

    /// Shuts down the [`Controller`], stopping all push sessions and waiting
    /// for their tasks to terminate.
    pub async fn shutdown(self) {
        for (endpoint, bridge) in self.bridges {
            let Some(listener) = bridge.listener else {
                continue;
            };

            listener.stop();
            if let Err(e) = listener.join().await {
                error!(
                    "Failed to await the push task of `{}`: {e}",
                    endpoint.host()
                );
            }
        }
    }
}

fn missing_bridge(endpoint: &BridgeEndpoint) -> Error {
    controller_error(format!(
        "Bridge `{}` is not registered",
        endpoint.host()
    ))
}
