//! Local view of the QwikSwitch devices.
//!
//! The cloud API is the single source of truth, but it is only consulted on
//! the poll interval. Between polls, a device we just commanded carries an
//! optimistic value so local views reflect the change immediately; the next
//! poll confirms or overrides it.

use std::collections::HashMap;

use serde::Serialize;

use crate::api::DeviceClass;
use crate::api::DeviceStatus;

/// Last known value of a controllable device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceValue {
    /// Assumed locally after issuing a command, not yet confirmed by a poll.
    Optimistic(u8),
    /// Reported by the cloud API.
    Confirmed(u8),
    /// Not seen in the latest poll.
    Unknown,
}

impl DeviceValue {
    /// The effective level, if one is known.
    pub fn level(&self) -> Option<u8> {
        match self {
            Self::Optimistic(level) | Self::Confirmed(level) => Some(*level),
            Self::Unknown => None,
        }
    }
}

/// Fold the next polled value into the current one.
///
/// The poll is authoritative: a polled value matching an optimistic
/// assumption confirms it, a differing one overrides it, and a device
/// missing from the poll goes `Unknown` regardless of what was assumed.
pub fn reconcile(current: DeviceValue, polled: Option<u8>) -> DeviceValue {
    let Some(actual) = polled else {
        return DeviceValue::Unknown;
    };
    match current {
        DeviceValue::Optimistic(assumed) if assumed == actual => DeviceValue::Confirmed(actual),
        // Discard any local assumption in favor of the polled value.
        _ => DeviceValue::Confirmed(actual),
    }
}

/// State of a single device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub device_class: DeviceClass,
    pub value: DeviceValue,
}

/// View of a dimmer as a light.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LightState {
    pub on: bool,
    /// Brightness in 0..=255, `None` while the device value is unknown.
    pub brightness: Option<u8>,
}

/// View of a relay as a switch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SwitchState {
    pub on: bool,
}

impl LightState {
    fn from_value(value: DeviceValue) -> Self {
        match value.level() {
            Some(level) => Self {
                on: level > 0,
                brightness: Some(level_to_brightness(level)),
            },
            None => Self::default(),
        }
    }
}

impl SwitchState {
    fn from_value(value: DeviceValue) -> Self {
        Self {
            on: value.level().is_some_and(|level| level > 0),
        }
    }
}

/// Map the API's 0..=100 level onto the conventional 0..=255 brightness.
fn level_to_brightness(level: u8) -> u8 {
    ((u16::from(level) * 255) / 100) as u8
}

/// Immutable snapshot of every known device.
///
/// Updates build a new snapshot from the previous one; readers hold on to
/// whatever they loaded.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub devices: HashMap<String, DeviceState>,
}

impl Snapshot {
    /// Build the next snapshot from a full poll result.
    ///
    /// Devices absent from the poll are kept but marked `Unknown`; devices
    /// never seen before are inserted as `Confirmed`.
    pub fn apply_poll(&self, statuses: &[DeviceStatus]) -> Snapshot {
        let polled: HashMap<&str, &DeviceStatus> = statuses
            .iter()
            .map(|status| (status.device_id.as_str(), status))
            .collect();

        let mut devices = HashMap::with_capacity(self.devices.len().max(statuses.len()));

        for (device_id, state) in &self.devices {
            let status = polled.get(device_id.as_str());
            devices.insert(
                device_id.clone(),
                DeviceState {
                    device_class: status.map_or(state.device_class, |s| s.device_class),
                    value: reconcile(state.value, status.map(|s| s.value)),
                },
            );
        }

        for status in statuses {
            devices.entry(status.device_id.clone()).or_insert(DeviceState {
                device_class: status.device_class,
                value: DeviceValue::Confirmed(status.value),
            });
        }

        Snapshot { devices }
    }

    /// Next snapshot with an optimistic level for one device, or `None` if
    /// the device has never been seen.
    pub fn with_optimistic(&self, device_id: &str, level: u8) -> Option<Snapshot> {
        let state = self.devices.get(device_id)?;
        let mut next = self.clone();
        next.devices.insert(
            device_id.to_string(),
            DeviceState {
                device_class: state.device_class,
                value: DeviceValue::Optimistic(level),
            },
        );
        Some(next)
    }

    /// Dimmers, viewed as lights.
    pub fn lights(&self) -> HashMap<String, LightState> {
        self.devices
            .iter()
            .filter(|(_, state)| state.device_class == DeviceClass::Dimmer)
            .map(|(id, state)| (id.clone(), LightState::from_value(state.value)))
            .collect()
    }

    /// Relays, viewed as switches.
    pub fn switches(&self) -> HashMap<String, SwitchState> {
        self.devices
            .iter()
            .filter(|(_, state)| state.device_class == DeviceClass::Relay)
            .map(|(id, state)| (id.clone(), SwitchState::from_value(state.value)))
            .collect()
    }
}
