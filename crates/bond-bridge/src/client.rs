use indexmap::IndexMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::device::{BridgeEndpoint, BridgeInfo, DeviceDescriptor, DeviceInfo, DeviceState};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Api, Outcome, PathParams, Transport};

// Reserved key of the device index, which is not a device.
const RESERVED_KEY: &str = "_";

/// Checks whether an action response status denotes a successful execution.
///
/// Older firmware replies `204` only, later firmware may reply `200` too.
#[must_use]
pub const fn is_action_success(status: u16) -> bool {
    matches!(status, 200 | 204)
}

pub(crate) fn parse<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidData,
            format!("Unexpected {what} format: {e}"),
        )
    })
}

/// A client for the REST API of a single bridge.
///
/// Every operation reports expected failures, such as a timeout or a
/// non-success status, through its return value after logging them.
/// The error channel is reserved to unexpected failures.
#[derive(Debug, Clone)]
pub struct RestClient {
    endpoint: BridgeEndpoint,
    transport: Transport,
    config: TransportConfig,
}

impl RestClient {
    /// Creates a [`RestClient`] for the given [`BridgeEndpoint`].
    ///
    /// # Errors
    ///
    /// An error is returned if the underlying HTTP client cannot be built.
    pub fn new(endpoint: BridgeEndpoint, config: TransportConfig) -> Result<Self> {
        let transport = Transport::new(&endpoint, &config)?;
        Ok(Self {
            endpoint,
            transport,
            config,
        })
    }

    /// Returns the [`BridgeEndpoint`].
    #[must_use]
    pub const fn endpoint(&self) -> &BridgeEndpoint {
        &self.endpoint
    }

    /// Returns the underlying [`Transport`].
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Lists the devices configured on the bridge, keyed by their identifier.
    ///
    /// Returns `None` if the device index cannot be retrieved. A device whose
    /// information cannot be retrieved is skipped.
    ///
    /// # Errors
    ///
    /// An error is returned if a response has an unexpected format.
    pub async fn list_devices(&self) -> Result<Option<IndexMap<String, DeviceDescriptor>>> {
        let index = match self
            .transport
            .call(&Api::DEVICE_LIST, PathParams::NONE, None)
            .await?
        {
            Outcome::Body { body, .. } => body,
            Outcome::Empty { .. } => {
                debug!("Empty device index on `{}`", self.endpoint.host());
                return Ok(Some(IndexMap::new()));
            }
            Outcome::SoftFailure(_) => return Ok(None),
        };

        let Value::Object(index) = index else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The device index is not a JSON object",
            ));
        };

        let mut devices = IndexMap::new();
        for device_id in index.keys().filter(|key| *key != RESERVED_KEY) {
            let info = match self
                .transport
                .call(&Api::DEVICE_INFO, PathParams::device(device_id), None)
                .await?
            {
                Outcome::Body { body, .. } => parse::<DeviceInfo>(body, "device information")?,
                Outcome::Empty { .. } | Outcome::SoftFailure(_) => {
                    warn!("Skip device `{device_id}`: no device information");
                    continue;
                }
            };

            let _ = devices.insert(
                device_id.clone(),
                DeviceDescriptor::from_info(device_id, info),
            );
        }

        Ok(Some(devices))
    }

    /// Retrieves the properties of a device.
    ///
    /// Returns `None` if the call fails or the bridge returns no data.
    ///
    /// # Errors
    ///
    /// An error is returned if the response has an unexpected format.
    pub async fn device_properties(&self, device_id: &str) -> Result<Option<DeviceState>> {
        self.device_object(&Api::DEVICE_PROPERTIES, device_id, "properties")
            .await
    }

    /// Retrieves the state of a device.
    ///
    /// Returns `None` if the call fails or the bridge returns no data.
    ///
    /// # Errors
    ///
    /// An error is returned if the response has an unexpected format.
    pub async fn device_state(&self, device_id: &str) -> Result<Option<DeviceState>> {
        self.device_object(&Api::DEVICE_STATE, device_id, "state")
            .await
    }

    /// Executes an action on a device, with an optional argument.
    ///
    /// Returns `true` only if the bridge replies with `200` or `204`.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only.
    pub async fn execute_action(
        &self,
        device_id: &str,
        action_id: &str,
        argument: Option<Value>,
    ) -> Result<bool> {
        let outcome = self
            .transport
            .call(
                &Api::DEVICE_ACTION,
                PathParams::action(device_id, action_id),
                argument.as_ref(),
            )
            .await?;

        match outcome.status() {
            Some(status) if is_action_success(status) => Ok(true),
            Some(status) => {
                warn!("Action `{action_id}` on device `{device_id}` returned status {status}");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Executes an action on a device and then reads back its state.
    ///
    /// The state is read after the configured refresh delay, since bridges
    /// may report the previous state right after an action. Returns `None` if
    /// either the action or the state read fails.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only.
    pub async fn execute_action_and_refresh(
        &self,
        device_id: &str,
        action_id: &str,
        argument: Option<Value>,
    ) -> Result<Option<DeviceState>> {
        if !self.execute_action(device_id, action_id, argument).await? {
            return Ok(None);
        }

        tokio::time::sleep(self.config.refresh_delay).await;

        self.device_state(device_id).await
    }

    /// Retrieves the bridge version information.
    ///
    /// When the bridge exposes its metadata, the bridge name is merged into
    /// the returned [`BridgeInfo`]. A failure of this second call is ignored.
    ///
    /// # Errors
    ///
    /// An error is returned if a response has an unexpected format.
    pub async fn bridge_info(&self) -> Result<Option<BridgeInfo>> {
        let mut info = match self
            .transport
            .call(&Api::BRIDGE_VERSION, PathParams::NONE, None)
            .await?
        {
            Outcome::Body { body, .. } => parse::<BridgeInfo>(body, "bridge version")?,
            Outcome::Empty { .. } | Outcome::SoftFailure(_) => return Ok(None),
        };

        // Not every firmware exposes the bridge metadata.
        match self
            .transport
            .call(&Api::BRIDGE_METADATA, PathParams::NONE, None)
            .await
        {
            Ok(Outcome::Body { body, .. }) => {
                if let Some(name) = bridge_name(&body) {
                    info.name = Some(name);
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Ignore bridge metadata of `{}`: {e}", self.endpoint.host()),
        }

        Ok(Some(info))
    }

    /// Checks whether the bridge responds.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only.
    pub async fn is_alive(&self) -> Result<bool> {
        let outcome = self
            .transport
            .call(&Api::BRIDGE_VERSION, PathParams::NONE, None)
            .await?;

        Ok(!outcome.is_failure())
    }

    /// Reboots the bridge.
    ///
    /// # Errors
    ///
    /// An error is returned for unexpected failures only.
    pub async fn reboot(&self) -> Result<bool> {
        let outcome = self
            .transport
            .call(&Api::BRIDGE_REBOOT, PathParams::NONE, None)
            .await?;

        Ok(outcome.status().is_some_and(is_action_success))
    }

    async fn device_object(
        &self,
        api: &Api,
        device_id: &str,
        what: &str,
    ) -> Result<Option<DeviceState>> {
        match self
            .transport
            .call(api, PathParams::device(device_id), None)
            .await?
        {
            Outcome::Body { body, .. } => parse(body, what).map(Some),
            Outcome::Empty { .. } => {
                debug!("Device `{device_id}` returned an empty {what}");
                Ok(None)
            }
            Outcome::SoftFailure(failure) => {
                debug!("Device `{device_id}` {what} unavailable: {failure}");
                Ok(None)
            }
        }
    }
}

pub(crate) fn bridge_name(metadata: &Value) -> Option<String> {
    metadata
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
