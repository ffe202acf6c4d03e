use std::net::Ipv6Addr;

use reqwest::{Client, Method, StatusCode};

use serde_json::{Value, json};

use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::device::{BridgeEndpoint, redact};
use crate::error::{Error, ErrorKind, Result};

// Header carrying the bridge token.
const TOKEN_HEADER: &str = "BOND-Token";

/// A REST API of a bridge.
///
/// The path may contain the `{device_id}` and `{action_id}` placeholders,
/// replaced by the values of [`PathParams`] when a call is performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Api {
    /// HTTP method.
    pub method: Method,
    /// Path template.
    pub path: &'static str,
}

impl Api {
    /// Lists the identifiers of all devices.
    pub const DEVICE_LIST: Self = Self::get("/v2/devices");
    /// Retrieves the information of a device.
    pub const DEVICE_INFO: Self = Self::get("/v2/devices/{device_id}");
    /// Retrieves the properties of a device.
    pub const DEVICE_PROPERTIES: Self = Self::get("/v2/devices/{device_id}/properties");
    /// Retrieves the state of a device.
    pub const DEVICE_STATE: Self = Self::get("/v2/devices/{device_id}/state");
    /// Executes an action on a device.
    pub const DEVICE_ACTION: Self = Self::put("/v2/devices/{device_id}/actions/{action_id}");
    /// Retrieves the bridge version information.
    pub const BRIDGE_VERSION: Self = Self::get("/v2/sys/version");
    /// Reboots the bridge.
    pub const BRIDGE_REBOOT: Self = Self::put("/v2/sys/reboot");
    /// Retrieves the bridge metadata, such as its name.
    ///
    /// This API is not available on every bridge.
    pub const BRIDGE_METADATA: Self = Self::get("/v2/bridge");
    /// Retrieves the bridge pairing token.
    pub const BRIDGE_TOKEN: Self = Self::get("/v2/token");

    const fn get(path: &'static str) -> Self {
        Self {
            method: Method::GET,
            path,
        }
    }

    const fn put(path: &'static str) -> Self {
        Self {
            method: Method::PUT,
            path,
        }
    }

    fn resolve(&self, params: PathParams<'_>) -> String {
        let mut path = self.path.to_owned();
        if let Some(device_id) = params.device_id {
            path = path.replace("{device_id}", device_id);
        }
        if let Some(action_id) = params.action_id {
            path = path.replace("{action_id}", action_id);
        }
        path
    }
}

/// Values substituted into an [`Api`] path template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathParams<'a> {
    device_id: Option<&'a str>,
    action_id: Option<&'a str>,
}

impl<'a> PathParams<'a> {
    /// No substitution values.
    pub const NONE: Self = Self {
        device_id: None,
        action_id: None,
    };

    /// Substitution values for a device path.
    #[must_use]
    pub const fn device(device_id: &'a str) -> Self {
        Self {
            device_id: Some(device_id),
            action_id: None,
        }
    }

    /// Substitution values for a device action path.
    #[must_use]
    pub const fn action(device_id: &'a str, action_id: &'a str) -> Self {
        Self {
            device_id: Some(device_id),
            action_id: Some(action_id),
        }
    }
}

/// An expected failure of a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The call did not complete within the configured timeout.
    Timeout,
    /// The bridge could not be reached or the connection broke.
    Connect,
    /// The bridge replied with a non-success status code.
    Status(u16),
}

impl Failure {
    /// Checks whether the bridge rejected the token.
    #[must_use]
    pub const fn is_unauthorized(self) -> bool {
        matches!(self, Self::Status(401))
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connection failure"),
            Self::Status(code) => write!(f, "HTTP status {code}"),
        }
    }
}

/// The outcome of a REST call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success status with an empty body.
    Empty {
        /// Response status code.
        status: u16,
    },
    /// Success status with a `JSON` body.
    Body {
        /// Response status code.
        status: u16,
        /// Response body.
        body: Value,
    },
    /// An expected failure, already logged as a warning.
    SoftFailure(Failure),
}

impl Outcome {
    /// Returns the status code of a successful call.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Empty { status } | Self::Body { status, .. } => Some(*status),
            Self::SoftFailure(_) => None,
        }
    }

    /// Returns the body of a successful call, if any.
    #[must_use]
    pub fn into_body(self) -> Option<Value> {
        match self {
            Self::Body { body, .. } => Some(body),
            Self::Empty { .. } | Self::SoftFailure(_) => None,
        }
    }

    /// Returns the failure of an unsuccessful call.
    #[must_use]
    pub const fn failure(&self) -> Option<Failure> {
        match self {
            Self::SoftFailure(failure) => Some(*failure),
            Self::Empty { .. } | Self::Body { .. } => None,
        }
    }

    /// Checks whether the call failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::SoftFailure(_))
    }
}

/// Executes REST calls against a single bridge host.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    host: String,
    token: Option<String>,
}

impl Transport {
    /// Creates a [`Transport`] which authenticates every call with the
    /// token of the given [`BridgeEndpoint`].
    ///
    /// # Errors
    ///
    /// An error is returned if the underlying HTTP client cannot be built.
    pub fn new(endpoint: &BridgeEndpoint, config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            host: endpoint.host().to_owned(),
            token: Some(endpoint.token().to_owned()),
        })
    }

    /// Creates a [`Transport`] which does not authenticate its calls.
    ///
    /// Used to acquire the token of a bridge.
    ///
    /// # Errors
    ///
    /// An error is returned if the underlying HTTP client cannot be built.
    pub fn unauthenticated(host: &str, config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            host: host.to_owned(),
            token: None,
        })
    }

    /// Returns the bridge host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Calls a bridge [`Api`].
    ///
    /// When an argument is given, the request body is `{"argument": value}`,
    /// otherwise an empty `JSON` object is sent.
    ///
    /// # Errors
    ///
    /// Timeouts, connection failures and non-success statuses are returned
    /// as [`Outcome::SoftFailure`]. An error is returned only for unexpected
    /// failures, such as a request which cannot be built or a success
    /// response whose body is not valid `JSON`.
    pub async fn call(
        &self,
        api: &Api,
        params: PathParams<'_>,
        argument: Option<&Value>,
    ) -> Result<Outcome> {
        let path = api.resolve(params);
        let url = format!("{}{path}", base_url(&self.host));

        let payload = argument.map_or_else(|| json!({}), |value| json!({ "argument": value }));

        debug!("HTTP {} {url}", api.method);

        let mut request = self.client.request(api.method.clone(), &url).json(&payload);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return self.network_failure(api, &path, e),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(self.status_failure(api, &path, status));
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return self.network_failure(api, &path, e),
        };

        if bytes.is_empty() {
            return Ok(Outcome::Empty {
                status: status.as_u16(),
            });
        }

        let body = serde_json::from_slice(&bytes).map_err(|e| {
            Error::new(
                ErrorKind::JsonResponse,
                format!(
                    "HTTP {} {path} on `{}` returned an invalid body: {e}",
                    api.method, self.host
                ),
            )
        })?;

        Ok(Outcome::Body {
            status: status.as_u16(),
            body,
        })
    }

    fn network_failure(&self, api: &Api, path: &str, e: reqwest::Error) -> Result<Outcome> {
        let failure = if e.is_timeout() {
            Failure::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            Failure::Connect
        } else {
            return Err(Error::new(
                ErrorKind::Request,
                format!(
                    "HTTP {} {path} on `{}` failed unexpectedly: {e}",
                    api.method, self.host
                ),
            ));
        };

        warn!(
            "HTTP {} {path} on `{}` failed with {failure}: {e}",
            api.method, self.host
        );

        Ok(Outcome::SoftFailure(failure))
    }

    fn status_failure(&self, api: &Api, path: &str, status: StatusCode) -> Outcome {
        if status == StatusCode::UNAUTHORIZED {
            warn!(
                "HTTP {} {path} on `{}` rejected the token `{}`",
                api.method,
                self.host,
                self.token.as_deref().map_or_else(String::new, redact)
            );
        } else {
            warn!("HTTP {} {path} on `{}` failed with {status}", api.method, self.host);
        }

        Outcome::SoftFailure(Failure::Status(status.as_u16()))
    }
}

// IPv6 literals must be bracketed inside a URL.
fn base_url(host: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("http://[{host}]")
    } else {
        format!("http://{host}")
    }
}

fn build_client(config: &TransportConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::new(ErrorKind::Request, format!("Impossible to build the HTTP client: {e}")))
}
