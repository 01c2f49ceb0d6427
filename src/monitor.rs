//! The reader loop's record pipeline.
//!
//! [`Monitor`] takes one raw line at a time through tokenizer, classifier and
//! the matching decoder, then applies the resulting channel values to the
//! gauges and offers them to the change gate. Bus connection transitions and
//! admin overrides are fed in through the same `&mut self`, so they are
//! strictly ordered with respect to record processing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::BusEvent;
use crate::channel::{Channel, Value};
use crate::correlator::correlate_event;
use crate::decoder::decode_process_values;
use crate::homie::DeviceState;
use crate::metrics::ChannelGauges;
use crate::parser::{RecordKind, classify, tokenize};
use crate::publisher::{BusPublisher, ChangeGatedPublisher};
use crate::state::SharedState;
use crate::stats::PipelineStats;

/// Notifications from the HTTP surface to the reader loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The fault record was overridden by an operator.
    FaultChanged,
}

/// Decodes lines and routes the resulting values.
pub struct Monitor<B> {
    state: Arc<SharedState>,
    gauges: Arc<ChannelGauges>,
    stats: Arc<PipelineStats>,
    publisher: ChangeGatedPublisher<B>,
}

impl<B: BusPublisher> Monitor<B> {
    pub fn new(
        publisher: ChangeGatedPublisher<B>,
        state: Arc<SharedState>,
        gauges: Arc<ChannelGauges>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            state,
            gauges,
            stats,
            publisher,
        }
    }

    /// Process a single raw line from the serial source.
    ///
    /// Returns the record kind, or `None` when the line carried no record
    /// or was dropped as malformed.
    pub fn process_line(&mut self, raw: &[u8]) -> Option<RecordKind> {
        self.stats.record_line(raw.len());
        let line = String::from_utf8_lossy(raw);

        let tokens = match tokenize(raw) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.stats.record_rejected();
                warn!("Dropping line: {} (line: {})", e, line.trim_end());
                return None;
            }
        };

        let kind = classify(&tokens)?;
        self.stats.record_kind(kind);

        match kind {
            RecordKind::ProcessValues => self.process_values(&tokens),
            RecordKind::Event => self.event(&tokens, &line),
            RecordKind::Unknown => {
                info!("Unknown record received: {}", line.trim_end());
            }
        }

        Some(kind)
    }

    fn process_values(&mut self, tokens: &[String]) {
        let result = {
            let mut record = self.state.process_values();
            decode_process_values(tokens, &mut record)
        };

        match result {
            Ok(report) => {
                self.stats.record_field_failures(report.skipped.len());
                self.apply(report.updates);
            }
            Err(e) => {
                self.stats.record_rejected();
                warn!("Error parsing process value record: {}", e);
            }
        }
    }

    fn event(&mut self, tokens: &[String], line: &str) {
        let outcome = correlate_event(tokens, line, &self.state);
        if outcome.rejected.is_some() {
            self.stats.record_rejected();
        }
        self.apply(outcome.updates);
    }

    fn apply(&mut self, updates: Vec<(Channel, Value)>) {
        for (channel, value) in updates {
            self.gauges.set(&channel, &value);
            let forwarded = self.publisher.propose(&channel, &value);
            self.stats.record_publish(forwarded);
        }
    }

    /// React to a bus connection transition.
    pub fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                info!("Connected to MQTT broker");
                self.publisher.notify_connected();
            }
            BusEvent::ConnectionLost(reason) => {
                warn!("MQTT connection lost: {}", reason);
                self.publisher.notify_connection_lost();
            }
        }
    }

    /// React to an operator action.
    pub fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::FaultChanged => {
                let fault = self.state.fault_snapshot();
                debug!("Publishing overridden fault state: {:?}", fault);
                self.apply(fault.channel_values());
            }
        }
    }

    /// Announce an orderly shutdown on the bus.
    pub fn shutdown(&mut self) {
        info!("Setting Homie state to disconnected");
        self.publisher.publish_attributes(DeviceState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use crate::correlator::FaultState;
    use crate::homie::HomieDevice;
    use crate::publisher::testing::RecordingBus;
    use std::sync::atomic::Ordering;

    const BOILER_TOPIC: &str = "homie/hargassner/prozesswerte/kesselTemperatur";

    fn monitor(bus: &RecordingBus) -> Monitor<&RecordingBus> {
        Monitor::new(
            ChangeGatedPublisher::new(bus, HomieDevice::default()),
            Arc::new(SharedState::new()),
            Arc::new(ChannelGauges::new()),
            Arc::new(PipelineStats::new()),
        )
    }

    fn pm_line(boiler_temperature: &str) -> String {
        let mut tokens: Vec<String> = std::iter::once("pm".to_string())
            .chain((1..32).map(|i| i.to_string()))
            .collect();
        tokens[4] = boiler_temperature.to_string();
        format!("{}\r\n", tokens.join(" "))
    }

    #[test]
    fn test_process_value_line_is_published_once() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        assert_eq!(
            monitor.process_line(pm_line("72").as_bytes()),
            Some(RecordKind::ProcessValues)
        );
        monitor.process_line(pm_line("72").as_bytes());
        monitor.process_line(pm_line("73").as_bytes());

        assert_eq!(bus.values_on(BOILER_TOPIC), vec!["72", "73"]);
        assert_eq!(monitor.gauges.get(&channel::BOILER_TEMPERATURE), Some(73.0));
        assert_eq!(monitor.stats.process_value_records.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_connection_loss_republishes_unchanged_values() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.process_line(pm_line("72").as_bytes());
        monitor.handle_bus_event(BusEvent::ConnectionLost("test".to_string()));
        monitor.process_line(pm_line("72").as_bytes());

        assert_eq!(bus.values_on(BOILER_TOPIC), vec!["72", "72"]);
    }

    #[test]
    fn test_connected_publishes_attributes() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.handle_bus_event(BusEvent::Connected);
        assert!(
            bus.messages()
                .iter()
                .any(|m| m.retained && m.topic == "homie/hargassner/$state" && m.payload == "ready")
        );
    }

    #[test]
    fn test_short_pm_line_keeps_previous_values() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.process_line(pm_line("72").as_bytes());
        monitor.process_line(b"pm 1 2 3 99 5\n");

        assert_eq!(
            monitor.state.process_values().get(&channel::BOILER_TEMPERATURE),
            Some(&Value::Integer(72))
        );
        assert_eq!(bus.values_on(BOILER_TOPIC), vec!["72"]);
        assert_eq!(monitor.stats.rejected_records.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_garbled_field_is_counted() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.process_line(pm_line("7?").as_bytes());
        assert!(bus.values_on(BOILER_TOPIC).is_empty());
        assert_eq!(
            bus.values_on("homie/hargassner/prozesswerte/rauchgasTemperatur"),
            vec!["5"]
        );
        assert_eq!(monitor.stats.field_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_escaped_fault_event() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.process_line(b"z 18:39:41 St\\xf6rung Set 0007 Stop:1\r\n");

        let fault = monitor.state.fault_snapshot();
        assert_eq!(fault.number, 7);
        assert!(fault.active);
        assert_eq!(bus.values_on("homie/hargassner/stoerung/nr"), vec!["7"]);
        assert_eq!(bus.values_on("homie/hargassner/stoerung/active"), vec!["true"]);
        assert_eq!(
            bus.values_on("homie/hargassner/stoerung/lastActive"),
            vec!["18:39:41"]
        );
        assert_eq!(monitor.gauges.get(&channel::FAULT_NUMBER), Some(7.0));
    }

    #[test]
    fn test_malformed_escape_is_dropped() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        assert_eq!(monitor.process_line(b"z 18:39:41 St\\xZZrung Set 7\n"), None);
        assert!(bus.messages().is_empty());
        assert_eq!(monitor.stats.rejected_records.load(Ordering::Relaxed), 1);
        assert!(!monitor.state.fault_snapshot().active);
    }

    #[test]
    fn test_unknown_and_blank_lines() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        assert_eq!(monitor.process_line(b"xy 1 2 3\n"), Some(RecordKind::Unknown));
        assert_eq!(monitor.process_line(b"\r\n"), None);
        assert!(bus.messages().is_empty());
        assert_eq!(monitor.stats.unknown_records.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.stats.lines.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_burner_cycle_publishes_durations() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.process_line("z 14:10:40 Kessel Zündung\n".as_bytes());
        monitor.process_line(b"z 14:20:20 Kessel Leistungsbrand\n");
        monitor.process_line(b"z 18:00:32 Kessel Aus\n");

        assert_eq!(
            bus.values_on("homie/hargassner/kessel/AnzahlZuendungen"),
            vec!["1"]
        );
        assert_eq!(
            bus.values_on("homie/hargassner/kessel/DauerLetzteZuendung"),
            vec!["580"]
        );
        assert_eq!(
            bus.values_on("homie/hargassner/kessel/DauerLetzterLeistungsbrand"),
            vec!["13212"]
        );
        assert_eq!(
            bus.values_on("homie/hargassner/prozesswerte/meldung"),
            vec!["Kessel Zündung", "Kessel Leistungsbrand", "Kessel Aus"]
        );
    }

    #[test]
    fn test_fault_override_is_published() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.state.set_fault(FaultState {
            number: 9,
            text: "manual".to_string(),
            active: true,
            last_change: "12:00:00".to_string(),
        });
        monitor.handle_control(ControlEvent::FaultChanged);

        assert_eq!(bus.values_on("homie/hargassner/stoerung/nr"), vec!["9"]);
        assert_eq!(bus.values_on("homie/hargassner/stoerung/text"), vec!["manual"]);
    }

    #[test]
    fn test_shutdown_publishes_disconnected_state() {
        let bus = RecordingBus::default();
        let mut monitor = monitor(&bus);

        monitor.shutdown();
        assert!(
            bus.messages()
                .iter()
                .any(|m| m.topic == "homie/hargassner/$state" && m.payload == "disconnected")
        );
    }
}
