//! Homie convention topics and attributes.
//!
//! Every channel is a Homie property of a node (its [`Group`]) of the single
//! boiler device. Values go to `<base>/<device>/<node>/<property>`; the
//! device, node and property descriptions are published as retained `$`
//! attributes whenever the broker connection comes up.

use std::fmt;

use crate::channel::{Channel, Group, channels_in};

/// Homie convention version announced in `$homie`.
pub const HOMIE_VERSION: &str = "4.0";

/// Default topic root.
pub const DEFAULT_BASE_TOPIC: &str = "homie";

/// Default device identifier.
pub const DEFAULT_DEVICE_ID: &str = "hargassner";

/// Default device name.
pub const DEFAULT_DEVICE_NAME: &str = "Hargassner Heizung";

/// Device lifecycle state published in `$state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Init,
    Ready,
    Disconnected,
    Lost,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Init => "init",
            DeviceState::Ready => "ready",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// One retained attribute message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub topic: String,
    pub value: String,
}

/// Topic layout of the boiler device.
#[derive(Debug, Clone)]
pub struct HomieDevice {
    base: String,
    id: String,
    name: String,
}

impl Default for HomieDevice {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOPIC, DEFAULT_DEVICE_ID, DEFAULT_DEVICE_NAME)
    }
}

impl HomieDevice {
    pub fn new(base: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            id: id.into(),
            name: name.into(),
        }
    }

    fn device_topic(&self) -> String {
        format!("{}/{}", self.base, self.id)
    }

    /// Value topic of `channel`.
    pub fn property_topic(&self, channel: &Channel) -> String {
        format!("{}/{}", self.device_topic(), channel.key())
    }

    /// Topic of the device `$state` attribute.
    pub fn state_topic(&self) -> String {
        format!("{}/$state", self.device_topic())
    }

    /// All device, node and property attributes, with `$state` set to `state`.
    pub fn attributes(&self, state: DeviceState) -> Vec<Attribute> {
        let device = self.device_topic();
        let mut out = Vec::new();
        let mut push = |topic: String, value: String| out.push(Attribute { topic, value });

        push(format!("{}/$homie", device), HOMIE_VERSION.to_string());
        push(format!("{}/$name", device), self.name.clone());
        push(format!("{}/$state", device), state.to_string());
        push(
            format!("{}/$nodes", device),
            Group::ALL.iter().map(Group::id).collect::<Vec<_>>().join(","),
        );

        for group in Group::ALL {
            let node = format!("{}/{}", device, group.id());
            push(format!("{}/$name", node), group.name().to_string());
            push(format!("{}/$type", node), group.name().to_string());
            push(
                format!("{}/$properties", node),
                channels_in(group).map(|c| c.id).collect::<Vec<_>>().join(","),
            );

            for channel in channels_in(group) {
                let property = format!("{}/{}", node, channel.id);
                push(format!("{}/$name", property), channel.name_en.to_string());
                push(
                    format!("{}/$datatype", property),
                    channel.kind.datatype().to_string(),
                );
                if !channel.unit.is_empty() {
                    push(format!("{}/$unit", property), channel.unit.to_string());
                }
            }
        }

        out
    }
}
