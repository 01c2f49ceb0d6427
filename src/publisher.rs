//! Change-gated publishing of channel values.
//!
//! The controller repeats most readings every cycle. Forwarding each one would
//! flood the broker with identical messages, so the publisher remembers the
//! last text forwarded per channel and only forwards a differing one. The
//! memory is dropped when the broker connection is lost and again when it
//! comes up: values offered while disconnected never reached the broker, and
//! every channel must be sent again once reconnected.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::channel::{Channel, Value};
use crate::homie::{DeviceState, HomieDevice};

/// Outbound side of the pub/sub bus.
///
/// Publishing is fire-and-forget; implementations log their own failures.
pub trait BusPublisher {
    fn publish(&self, topic: &str, payload: &str, retained: bool);
}

impl<B: BusPublisher + ?Sized> BusPublisher for &B {
    fn publish(&self, topic: &str, payload: &str, retained: bool) {
        (**self).publish(topic, payload, retained)
    }
}

/// Forwards channel values to the bus when they change.
pub struct ChangeGatedPublisher<B> {
    bus: B,
    device: HomieDevice,
    cache: HashMap<String, String>,
}

impl<B: BusPublisher> ChangeGatedPublisher<B> {
    pub fn new(bus: B, device: HomieDevice) -> Self {
        Self {
            bus,
            device,
            cache: HashMap::new(),
        }
    }

    /// Offer a new value for `channel`.
    ///
    /// Returns `true` when the value was forwarded. Blank text is only ever
    /// forwarded on text channels; the controller uses blank tokens for "not
    /// applicable" and numeric consumers cannot take them.
    pub fn propose(&mut self, channel: &Channel, value: &Value) -> bool {
        let text = value.canonical();
        if text.is_empty() && channel.kind.is_numeric() {
            return false;
        }

        let key = channel.key();
        if self.cache.get(&key) == Some(&text) {
            return false;
        }

        self.bus
            .publish(&self.device.property_topic(channel), &text, false);
        self.cache.insert(key, text);
        true
    }

    /// Forget everything forwarded so far.
    pub fn notify_connection_lost(&mut self) {
        debug!("Clearing publish cache ({} entries)", self.cache.len());
        self.cache.clear();
    }

    /// Announce the device on a fresh connection.
    ///
    /// Also forgets everything offered before, including values proposed
    /// before the first connection came up.
    pub fn notify_connected(&mut self) {
        self.cache.clear();
        self.publish_attributes(DeviceState::Ready);
    }

    /// Publish all retained Homie attributes with the given device state.
    pub fn publish_attributes(&mut self, state: DeviceState) {
        let attributes = self.device.attributes(state);
        info!(
            "Publishing {} device attributes (state {})",
            attributes.len(),
            state
        );
        for attribute in attributes {
            self.bus.publish(&attribute.topic, &attribute.value, true);
        }
    }

    /// Number of channels with a remembered value.
    pub fn cached_channels(&self) -> usize {
        self.cache.len()
    }
}
