use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The state of a device.
///
/// The set of state variables depends on the device kind, for example
/// `power`, `speed`, `direction`, `brightness`, `light` or `open`. The map is
/// passed through to the caller exactly as the bridge reports it.
pub type DeviceState = Map<String, Value>;

/// Device action names understood by a bridge.
///
/// The comment next to an action describes its argument, if any.
pub mod actions {
    /// Turns a device on.
    pub const TURN_ON: &str = "TurnOn";
    /// Turns a device off.
    pub const TURN_OFF: &str = "TurnOff";
    /// Toggles the power of a device.
    pub const TOGGLE_POWER: &str = "TogglePower";
    /// Sets a timer, in seconds.
    pub const SET_TIMER: &str = "SetTimer";
    /// Sets the fan speed.
    pub const SET_SPEED: &str = "SetSpeed";
    /// Increases the fan speed by a number of speeds.
    pub const INCREASE_SPEED: &str = "IncreaseSpeed";
    /// Decreases the fan speed by a number of speeds.
    pub const DECREASE_SPEED: &str = "DecreaseSpeed";
    /// Turns breeze mode on.
    pub const BREEZE_ON: &str = "BreezeOn";
    /// Turns breeze mode off.
    pub const BREEZE_OFF: &str = "BreezeOff";
    /// Sets breeze parameters as `[mode, mean, var]`.
    pub const SET_BREEZE: &str = "SetBreeze";
    /// Sets the fan direction: `1` forward, `-1` reverse.
    pub const SET_DIRECTION: &str = "SetDirection";
    /// Toggles the fan direction.
    pub const TOGGLE_DIRECTION: &str = "ToggleDirection";
    /// Turns the light on.
    pub const TURN_LIGHT_ON: &str = "TurnLightOn";
    /// Turns the light off.
    pub const TURN_LIGHT_OFF: &str = "TurnLightOff";
    /// Toggles the light.
    pub const TOGGLE_LIGHT: &str = "ToggleLight";
    /// Turns the up light on.
    pub const TURN_UP_LIGHT_ON: &str = "TurnUpLightOn";
    /// Turns the down light on.
    pub const TURN_DOWN_LIGHT_ON: &str = "TurnDownLightOn";
    /// Turns the up light off.
    pub const TURN_UP_LIGHT_OFF: &str = "TurnUpLightOff";
    /// Turns the down light off.
    pub const TURN_DOWN_LIGHT_OFF: &str = "TurnDownLightOff";
    /// Toggles the up light.
    pub const TOGGLE_UP_LIGHT: &str = "ToggleUpLight";
    /// Toggles the down light.
    pub const TOGGLE_DOWN_LIGHT: &str = "ToggleDownLight";
    /// Sets the light brightness percentage.
    pub const SET_BRIGHTNESS: &str = "SetBrightness";
    /// Increases the light brightness by a percentage.
    pub const INCREASE_BRIGHTNESS: &str = "IncreaseBrightness";
    /// Decreases the light brightness by a percentage.
    pub const DECREASE_BRIGHTNESS: &str = "DecreaseBrightness";
    /// Sets the up light brightness percentage.
    pub const SET_UP_LIGHT_BRIGHTNESS: &str = "SetUpLightBrightness";
    /// Sets the down light brightness percentage.
    pub const SET_DOWN_LIGHT_BRIGHTNESS: &str = "SetDownLightBrightness";
    /// Sets the fireplace flame percentage.
    pub const SET_FLAME: &str = "SetFlame";
    /// Increases the fireplace flame by a percentage.
    pub const INCREASE_FLAME: &str = "IncreaseFlame";
    /// Decreases the fireplace flame by a percentage.
    pub const DECREASE_FLAME: &str = "DecreaseFlame";
    /// Opens a shade.
    pub const OPEN: &str = "Open";
    /// Closes a shade.
    pub const CLOSE: &str = "Close";
    /// Toggles a shade between open and closed.
    pub const TOGGLE_OPEN: &str = "ToggleOpen";
    /// Turns the fireplace fan off.
    pub const TURN_FP_FAN_OFF: &str = "TurnFpFanOff";
    /// Turns the fireplace fan on.
    pub const TURN_FP_FAN_ON: &str = "TurnFpFanOn";
    /// Sets the fireplace fan speed.
    pub const SET_FP_FAN: &str = "SetFpFan";
}

/// Identifies and authenticates a single bridge.
///
/// An endpoint is immutable once created and keys the bridge inside a
/// [`crate::controller::Controller`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeEndpoint {
    host: String,
    token: String,
}

impl BridgeEndpoint {
    /// Creates a [`BridgeEndpoint`] from a host name, or address, and the
    /// token accepted by the bridge.
    #[must_use]
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
        }
    }

    /// Returns the bridge host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the bridge token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns a printable version of the token which only reveals its first
    /// characters.
    #[must_use]
    pub fn redacted_token(&self) -> String {
        redact(&self.token)
    }
}

impl std::fmt::Debug for BridgeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEndpoint")
            .field("host", &self.host)
            .field("token", &self.redacted_token())
            .finish()
    }
}

pub(crate) fn redact(token: &str) -> String {
    let visible: String = token.chars().take(3).collect();
    format!("{visible}***")
}

/// The kind of a device controlled by a bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// A ceiling fan, possibly with a light.
    #[serde(rename = "CF")]
    CeilingFan,
    /// A fireplace.
    #[serde(rename = "FP")]
    Fireplace,
    /// A motorized shade.
    #[serde(rename = "MS")]
    MotorizedShade,
    /// Any other device.
    ///
    /// Type codes unknown to this crate are mapped to this kind.
    #[default]
    #[serde(rename = "GX", other)]
    Generic,
}

impl DeviceKind {
    /// Returns the type code used by the bridge.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::CeilingFan => "CF",
            Self::Fireplace => "FP",
            Self::MotorizedShade => "MS",
            Self::Generic => "GX",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CeilingFan => "Ceiling Fan",
            Self::Fireplace => "Fireplace",
            Self::MotorizedShade => "Motorized Shade",
            Self::Generic => "Generic",
        })
    }
}

// Device information as returned by the bridge, without the identifier.
#[derive(Deserialize)]
pub(crate) struct DeviceInfo {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: DeviceKind,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    actions: BTreeSet<String>,
}

/// Description of a device controlled by a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Device identifier.
    pub device_id: String,
    /// Device name.
    pub name: String,
    /// Device kind.
    pub kind: DeviceKind,
    /// Device location, if configured on the bridge.
    pub location: Option<String>,
    /// Actions supported by the device.
    pub actions: BTreeSet<String>,
}

impl DeviceDescriptor {
    pub(crate) fn from_info(device_id: &str, info: DeviceInfo) -> Self {
        Self {
            device_id: device_id.to_owned(),
            name: info.name,
            kind: info.kind,
            location: info.location,
            actions: info.actions,
        }
    }

    /// Checks whether the device supports the given action.
    #[must_use]
    pub fn supports(&self, action: &str) -> bool {
        self.actions.contains(action)
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} `{}` ({})", self.kind, self.name, self.device_id)?;
        if let Some(location) = &self.location {
            write!(f, " in {location}")?;
        }
        Ok(())
    }
}

/// The kind of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// A Bond bridge controlling several devices.
    Bridge,
    /// A "Smart by Bond" device which exposes a reduced API surface.
    SmartByBond,
}

impl BridgeKind {
    // Bond bridges have serial numbers starting with `ZZ`.
    fn from_bond_id(bond_id: &str) -> Self {
        if bond_id.starts_with("ZZ") {
            Self::Bridge
        } else {
            Self::SmartByBond
        }
    }
}

/// Version information about the hardware and firmware of a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfo {
    /// Bridge identifier.
    #[serde(rename = "bondid", default)]
    pub bond_id: Option<String>,
    /// Firmware target.
    #[serde(default)]
    pub target: Option<String>,
    /// Firmware version.
    #[serde(rename = "fw_ver", default)]
    pub firmware_version: Option<String>,
    /// Firmware date.
    #[serde(rename = "fw_date", default)]
    pub firmware_date: Option<String>,
    /// Bridge uptime, in seconds.
    #[serde(rename = "uptime_s", default)]
    pub uptime: Option<u64>,
    /// Hardware manufacturer.
    #[serde(default)]
    pub make: Option<String>,
    /// Hardware model.
    #[serde(default)]
    pub model: Option<String>,
    /// Human-readable bridge name.
    ///
    /// The version endpoint does not report it, it is merged from the bridge
    /// metadata when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other field reported by the bridge.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BridgeInfo {
    /// Returns the [`BridgeKind`] deduced from the bridge identifier.
    ///
    /// A bridge without an identifier is considered a full bridge.
    #[must_use]
    pub fn kind(&self) -> BridgeKind {
        self.bond_id
            .as_deref()
            .map_or(BridgeKind::Bridge, BridgeKind::from_bond_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        BridgeEndpoint, BridgeInfo, BridgeKind, DeviceDescriptor, DeviceInfo, DeviceKind, actions,
    };

    #[test]
    fn endpoint_debug_redacts_token() {
        let endpoint = BridgeEndpoint::new("192.168.1.50", "abc123");

        assert_eq!(endpoint.host(), "192.168.1.50");
        assert_eq!(endpoint.token(), "abc123");
        assert_eq!(
            format!("{endpoint:?}"),
            "BridgeEndpoint { host: \"192.168.1.50\", token: \"abc***\" }"
        );
    }

    #[test]
    fn device_kinds() {
        let kinds: Vec<DeviceKind> =
            serde_json::from_value(json!(["CF", "FP", "MS", "GX", "LT"])).unwrap();

        assert_eq!(
            kinds,
            vec![
                DeviceKind::CeilingFan,
                DeviceKind::Fireplace,
                DeviceKind::MotorizedShade,
                DeviceKind::Generic,
                DeviceKind::Generic,
            ]
        );
        assert_eq!(DeviceKind::MotorizedShade.code(), "MS");
    }

    #[test]
    fn descriptor_from_info() {
        let info: DeviceInfo = serde_json::from_value(json!({
            "name": "Living Room Fan",
            "type": "CF",
            "location": "Living Room",
            "actions": ["TurnOn", "TurnOff", "SetSpeed"],
            "properties": "properties",
            "__": "4a2e9d3a"
        }))
        .unwrap();

        let descriptor = DeviceDescriptor::from_info("dev1", info);

        assert_eq!(descriptor.device_id, "dev1");
        assert_eq!(descriptor.kind, DeviceKind::CeilingFan);
        assert!(descriptor.supports(actions::SET_SPEED));
        assert!(!descriptor.supports(actions::OPEN));
        assert_eq!(
            descriptor.to_string(),
            "Ceiling Fan `Living Room Fan` (dev1) in Living Room"
        );
    }

    #[test]
    fn bridge_info_kind() {
        let info: BridgeInfo = serde_json::from_value(json!({
            "target": "zermatt",
            "fw_ver": "v2.10.8",
            "bondid": "ZZBL12345",
            "api": 2
        }))
        .unwrap();

        assert_eq!(info.kind(), BridgeKind::Bridge);
        assert_eq!(info.firmware_version.as_deref(), Some("v2.10.8"));
        assert_eq!(info.extra.get("api"), Some(&json!(2)));

        let info: BridgeInfo = serde_json::from_value(json!({
            "bondid": "KVPRBDJ45009"
        }))
        .unwrap();

        assert_eq!(info.kind(), BridgeKind::SmartByBond);
    }
}
