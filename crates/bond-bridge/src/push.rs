use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::PushConfig;
use crate::device::BridgeEndpoint;
use crate::error::{Error, ErrorKind, Result};

// Datagram sent to keep the push session open.
const KEEP_ALIVE: &[u8] = b"\n";

// Maximum size of a received datagram.
const DATAGRAM_SIZE: usize = 8192;

// Bridge identifier field.
const BRIDGE_ID: &str = "B";
// Topic field.
const TOPIC: &str = "t";
// Body field.
const BODY: &str = "b";
// Error identifier field.
const ERROR_ID: &str = "err_id";
// Error message field.
const ERROR_MESSAGE: &str = "err_msg";

/// A decoded push datagram.
///
/// Keep-alive acknowledgments and state updates carry no message type.
/// An acknowledgment is recognized by the presence of the bridge identifier
/// and the absence of a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Acknowledgment of a keep-alive datagram.
    KeepAliveAck {
        /// Bridge identifier, as sent by the bridge.
        bridge_id: Value,
    },
    /// A device state change.
    StateUpdate {
        /// Identifier of the device, extracted from the topic.
        device_id: String,
        /// Topic, in the `devices/{id}/state` form.
        topic: String,
        /// New state of the device, as sent by the bridge.
        body: Value,
    },
    /// An error reported by the bridge.
    BridgeError {
        /// Bridge identifier, when reported.
        bridge_id: Option<String>,
        /// Error code.
        code: Value,
        /// Error message.
        message: String,
    },
}

impl PushMessage {
    /// Decodes a push datagram.
    ///
    /// Leading and trailing whitespace, such as a line terminator, is
    /// ignored.
    ///
    /// # Errors
    ///
    /// An error is returned if the datagram is not a `JSON` object or if
    /// it does not match any known message.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(datagram.trim_ascii())?;

        let Value::Object(mut object) = value else {
            return Err(invalid_message("the datagram is not a JSON object"));
        };

        if let Some(code) = object.remove(ERROR_ID) {
            return Ok(Self::BridgeError {
                bridge_id: string_field(&object, BRIDGE_ID),
                code,
                message: string_field(&object, ERROR_MESSAGE).unwrap_or_default(),
            });
        }

        if let Some(topic) = object.get(TOPIC) {
            let topic = topic
                .as_str()
                .ok_or_else(|| invalid_message("the topic is not a string"))?
                .to_owned();

            let device_id = device_id_from_topic(&topic)
                .ok_or_else(|| invalid_message(format!("unknown topic `{topic}`")))?
                .to_owned();

            let body = object
                .remove(BODY)
                .ok_or_else(|| invalid_message(format!("missing body for topic `{topic}`")))?;

            return Ok(Self::StateUpdate {
                device_id,
                topic,
                body,
            });
        }

        if let Some(bridge_id) = object.remove(BRIDGE_ID) {
            return Ok(Self::KeepAliveAck { bridge_id });
        }

        Err(invalid_message("unrecognized message"))
    }
}

fn invalid_message(info: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidData, format!("Invalid push message: {info}"))
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("devices"), Some(device_id), Some("state"), None) if !device_id.is_empty() => {
            Some(device_id)
        }
        _ => None,
    }
}

/// A device state change delivered by a [`PushListener`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    /// Host of the bridge controlling the device.
    pub host: String,
    /// Device identifier.
    pub device_id: String,
    /// New device state, as sent by the bridge.
    pub state: Value,
}

/// A receiver of device state changes.
///
/// The handler runs on the background task of the [`PushListener`], so it
/// must return quickly. Long operations, such as REST calls, must be
/// dispatched elsewhere, otherwise keep-alives are delayed.
pub trait StateHandler: Send + Sync + 'static {
    /// Handles the new state of a device.
    fn on_state(&self, device_id: &str, state: Value);
}

impl<F> StateHandler for F
where
    F: Fn(&str, Value) + Send + Sync + 'static,
{
    fn on_state(&self, device_id: &str, state: Value) {
        self(device_id, state);
    }
}

/// A [`StateHandler`] forwarding state changes to a bounded channel.
///
/// When the channel is full the state change is discarded.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    host: String,
    sender: Sender<StateUpdate>,
}

impl ChannelHandler {
    /// Creates a [`ChannelHandler`] which sends the state changes of the
    /// bridge at `host` to the given [`Sender`].
    #[must_use]
    pub fn new(host: impl Into<String>, sender: Sender<StateUpdate>) -> Self {
        Self {
            host: host.into(),
            sender,
        }
    }
}

impl StateHandler for ChannelHandler {
    fn on_state(&self, device_id: &str, state: Value) {
        let update = StateUpdate {
            host: self.host.clone(),
            device_id: device_id.to_owned(),
            state,
        };
        match self.sender.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                warn!(
                    "State receiver full, discard the update of device `{}`",
                    update.device_id
                );
            }
            Err(TrySendError::Closed(update)) => {
                debug!(
                    "State receiver closed, discard the update of device `{}`",
                    update.device_id
                );
            }
        }
    }
}

/// The reason a push session terminated.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The owner stopped the listener.
    Stopped,
    /// The socket could not be opened or connected.
    Connect(String),
    /// A socket operation failed.
    Socket(String),
    /// No acknowledgment arrived for a keep-alive.
    AckTimeout,
    /// The bridge reported an error.
    BridgeError {
        /// Error code.
        code: Value,
        /// Error message.
        message: String,
    },
    /// The bridge sent a datagram which violates the push protocol.
    Protocol(String),
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped by the owner"),
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::Socket(e) => write!(f, "socket error: {e}"),
            Self::AckTimeout => write!(f, "keep-alive not acknowledged"),
            Self::BridgeError { code, message } => {
                write!(f, "bridge error {code}: {message}")
            }
            Self::Protocol(e) => write!(f, "protocol violation: {e}"),
        }
    }
}

// Clears the alive flag when the background task exits, panics included.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// A push session, from a successful connection to the first fault.
struct Session<'a, H: StateHandler> {
    socket: UdpSocket,
    host: &'a str,
    config: &'a PushConfig,
    handler: &'a H,
    last_keep_alive: Option<Instant>,
    buffer: Vec<u8>,
}

impl<'a, H: StateHandler> Session<'a, H> {
    async fn connect(host: &'a str, config: &'a PushConfig, handler: &'a H) -> Result<Self> {
        let address = tokio::net::lookup_host((host, config.port))
            .await?
            .next()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Push,
                    format!("No address found for host `{host}`"),
                )
            })?;

        let local: SocketAddr = if address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(address).await?;

        Ok(Self {
            socket,
            host,
            config,
            handler,
            last_keep_alive: None,
            buffer: vec![0; DATAGRAM_SIZE],
        })
    }

    async fn run(mut self) -> Termination {
        loop {
            if self
                .last_keep_alive
                .is_none_or(|instant| instant.elapsed() >= self.config.keep_alive_interval)
            {
                if let Err(termination) = self.keep_alive().await {
                    return termination;
                }
                self.last_keep_alive = Some(Instant::now());
            }

            let len = match timeout(self.config.status_timeout, self.socket.recv(&mut self.buffer))
                .await
            {
                // No state change in the meantime.
                Err(_) => continue,
                Ok(Err(e)) => return Termination::Socket(e.to_string()),
                Ok(Ok(len)) => len,
            };

            match PushMessage::decode(&self.buffer[..len]) {
                Ok(PushMessage::StateUpdate {
                    device_id, body, ..
                }) => self.handler.on_state(&device_id, body),
                Ok(PushMessage::BridgeError { code, message, .. }) => {
                    return Termination::BridgeError { code, message };
                }
                Ok(PushMessage::KeepAliveAck { bridge_id }) => {
                    return Termination::Protocol(format!(
                        "unsolicited keep-alive acknowledgment from `{bridge_id}`"
                    ));
                }
                Err(e) => return Termination::Protocol(e.info().to_owned()),
            }
        }
    }

    async fn keep_alive(&mut self) -> std::result::Result<(), Termination> {
        debug!("Send keep-alive to `{}`", self.host);

        if let Err(e) = self.socket.send(KEEP_ALIVE).await {
            return Err(Termination::Socket(e.to_string()));
        }

        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let len = match timeout_at(deadline, self.socket.recv(&mut self.buffer)).await {
                Err(_) => return Err(Termination::AckTimeout),
                Ok(Err(e)) => return Err(Termination::Socket(e.to_string())),
                Ok(Ok(len)) => len,
            };

            match PushMessage::decode(&self.buffer[..len]) {
                Ok(PushMessage::KeepAliveAck { bridge_id }) => {
                    debug!("Keep-alive acknowledged by `{bridge_id}`");
                    return Ok(());
                }
                // A state change sent right before the acknowledgment.
                Ok(PushMessage::StateUpdate {
                    device_id, body, ..
                }) => self.handler.on_state(&device_id, body),
                Ok(PushMessage::BridgeError { code, message, .. }) => {
                    return Err(Termination::BridgeError { code, message });
                }
                Err(e) => return Err(Termination::Protocol(e.info().to_owned())),
            }
        }
    }
}

async fn run_listener<H: StateHandler>(
    host: String,
    config: PushConfig,
    handler: H,
    alive: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
) -> Termination {
    let _guard = AliveGuard(alive);

    let termination = tokio::select! {
        () = cancellation_token.cancelled() => Termination::Stopped,
        termination = async {
            match Session::connect(&host, &config, &handler).await {
                Ok(session) => {
                    info!("Push session with `{host}` established");
                    session.run().await
                }
                Err(e) => Termination::Connect(e.info().to_owned()),
            }
        } => termination,
    };

    match &termination {
        Termination::Stopped => info!("Push session with `{host}` {termination}"),
        _ => warn!("Push session with `{host}` terminated: {termination}"),
    }

    termination
}

/// A listener of the device state changes pushed by a bridge.
///
/// The listener runs a single push session on a background task, started
/// when the listener is created. The session ends at the first fault, such
/// as a missing keep-alive acknowledgment, a socket error, a bridge error or
/// an unexpected datagram, and is never restarted: the owner polls
/// [`PushListener::is_alive`] and creates a new listener when needed.
///
/// Dropping the listener stops its session.
#[derive(Debug)]
pub struct PushListener {
    host: String,
    alive: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<Termination>>,
}

impl PushListener {
    /// Starts a [`PushListener`] for the bridge identified by the given
    /// [`BridgeEndpoint`], delivering state changes to `handler`.
    ///
    /// Must be called within a `tokio` runtime.
    #[must_use]
    pub fn start<H: StateHandler>(endpoint: &BridgeEndpoint, config: PushConfig, handler: H) -> Self {
        let host = endpoint.host().to_owned();
        let alive = Arc::new(AtomicBool::new(true));
        let cancellation_token = CancellationToken::new();

        let handle = tokio::spawn(run_listener(
            host.clone(),
            config,
            handler,
            Arc::clone(&alive),
            cancellation_token.clone(),
        ));

        Self {
            host,
            alive,
            cancellation_token,
            handle: Some(handle),
        }
    }

    /// Starts a [`PushListener`] which forwards state changes to the returned
    /// [`Receiver`].
    ///
    /// The `buffer_size` parameter specifies how many state changes the
    /// receiver can hold. When it is full, new state changes are discarded.
    #[must_use]
    pub fn start_with_channel(
        endpoint: &BridgeEndpoint,
        config: PushConfig,
        buffer_size: usize,
    ) -> (Self, Receiver<StateUpdate>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let handler = ChannelHandler::new(endpoint.host(), tx);
        (Self::start(endpoint, config, handler), rx)
    }

    /// Returns the bridge host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Checks whether the push session is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stops the push session.
    ///
    /// Calling this method on a terminated listener has no effect.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Waits for the push session to terminate and returns the reason.
    ///
    /// # Errors
    ///
    /// An error is returned if the background task panicked, for example
    /// inside the state handler.
    pub async fn join(mut self) -> Result<Termination> {
        let Some(handle) = self.handle.take() else {
            return Ok(Termination::Stopped);
        };

        handle.await.map_err(|e| {
            error!("Push task of `{}` failed: {e}", self.host);
            Error::new(ErrorKind::Push, format!("Push task failed: {e}"))
        })
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::error::ErrorKind;

    use super::{PushMessage, device_id_from_topic};

    #[test]
    fn keep_alive_ack() {
        assert_eq!(
            PushMessage::decode(br#"{"B":"ZZBL12345"}"#).unwrap(),
            PushMessage::KeepAliveAck {
                bridge_id: json!("ZZBL12345")
            }
        );

        // Trailing line terminator.
        assert_eq!(
            PushMessage::decode(b"{\"B\":\"ZZBL12345\",\"d\":0,\"v\":\"v3.4.7\"}\n").unwrap(),
            PushMessage::KeepAliveAck {
                bridge_id: json!("ZZBL12345")
            }
        );

        // Only the presence of the bridge identifier matters.
        assert_eq!(
            PushMessage::decode(br#"{"B":12345}"#).unwrap(),
            PushMessage::KeepAliveAck {
                bridge_id: json!(12345)
            }
        );
        assert_eq!(
            PushMessage::decode(br#"{"B":null}"#).unwrap(),
            PushMessage::KeepAliveAck {
                bridge_id: Value::Null
            }
        );
    }

    #[test]
    fn state_update() {
        let datagram = json!({
            "B": "ZZBL12345",
            "t": "devices/dev1/state",
            "i": "00000000000000000000",
            "s": 200,
            "m": 0,
            "f": 255,
            "b": {"power": 0, "speed": 2, "timer": {"remaining": 10}}
        });

        let message = PushMessage::decode(datagram.to_string().as_bytes()).unwrap();

        assert_eq!(
            message,
            PushMessage::StateUpdate {
                device_id: "dev1".into(),
                topic: "devices/dev1/state".into(),
                body: json!({"power": 0, "speed": 2, "timer": {"remaining": 10}}),
            }
        );
    }

    #[test]
    fn bridge_error() {
        let message = PushMessage::decode(
            br#"{"B":"ZZBL12345","err_id":2,"err_msg":"Invalid keep-alive"}"#,
        )
        .unwrap();

        assert_eq!(
            message,
            PushMessage::BridgeError {
                bridge_id: Some("ZZBL12345".into()),
                code: json!(2),
                message: "Invalid keep-alive".into(),
            }
        );
    }

    #[test]
    fn invalid_messages() {
        let datagrams: [&[u8]; 7] = [
            b"not json",
            b"[1, 2, 3]",
            br#"{"d": 0}"#,
            br#"{"t": "devices/dev1/state"}"#,
            br#"{"t": "devices/dev1/properties", "b": {}}"#,
            br#"{"t": 42, "b": {}}"#,
            b"",
        ];

        for datagram in datagrams {
            let error = PushMessage::decode(datagram).unwrap_err();
            assert!(
                matches!(
                    error.kind(),
                    ErrorKind::InvalidData | ErrorKind::JsonResponse
                ),
                "{error}"
            );
        }
    }

    #[test]
    fn topics() {
        assert_eq!(device_id_from_topic("devices/dev1/state"), Some("dev1"));
        assert_eq!(device_id_from_topic("devices//state"), None);
        assert_eq!(device_id_from_topic("devices/dev1/state/extra"), None);
        assert_eq!(device_id_from_topic("groups/g1/state"), None);
        assert_eq!(device_id_from_topic("devices/dev1"), None);
    }
}
