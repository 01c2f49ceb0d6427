//! Event correlator for `z` records.
//!
//! Event lines are free-form and timestamped:
//!
//! ```text
//! z 14:10:40 Kessel Zündung         ignition starts
//! z 14:20:20 Kessel Leistungsbrand  power fire starts, ignition ends
//! z 18:00:32 Kessel Aus             power fire ends
//! z 18:39:41 Störung Set 7 Stop:1   fault 7 raised
//! z 18:40:16 Störung Quit 0007      fault 7 cleared
//! ```
//!
//! Three independent branches look at every event: the fault lifecycle, the
//! burner lifecycle and the free-text message fallback. The burner branch
//! derives ignition and power fire durations; neither is transmitted by the
//! controller.

use chrono::NaiveTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{self, Channel, Value};
use crate::parser::parse_time_of_day;
use crate::state::SharedState;

/// Subject token of burner lifecycle events.
pub const BOILER_SUBJECT: &str = "Kessel";

/// Burner event marking the start of the power fire phase.
pub const POWER_FIRE_MARKER: &str = "Leistungsbrand";

/// Burner event marking the end of the power fire phase.
pub const OFF_MARKER: &str = "Aus";

/// Text of fault codes missing from [`fault_text`]'s table.
pub const UNKNOWN_FAULT_TEXT: &str = "Unbekannte Störung";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Look up the controller's text for a fault code.
pub fn fault_text(number: i64) -> &'static str {
    match number {
        1 => "Sicherung F25 defekt",
        2 => "Elektronischer Motorschutz Einschubschnecke ausgelöst",
        3 => "Elektronischer Motorschutz Raumaustragung ausgelöst",
        4 => "Elektronischer Motorschutz Ascheaustragung ausgelöst",
        5 => "Sicherheitsthermostat (STB)",
        6 => "Rücklaufzeit überschritten",
        7 => "Endschalter Deckel offen",
        8 => "Brennraum überfüllt",
        9 => "Brandschutzklappe öffnet nicht",
        10 => "Zündzeit überschritten",
        11 => "Minimale Rauchgastemperatur unterschritten",
        12 => "Initiator Entaschung",
        13 => "Überstrom Einschubschnecke",
        14 => "Überstrom Raumaustragung",
        15 => "Überstrom Aschenaustragung",
        16 => "Rauchgasfühler falsch angeschlossen",
        17 => "Rauchgasfühler Unterbrechung",
        18 => "Kesselfühler Kurzschluss",
        19 => "Kesselfühler Unterbrechung",
        20 => "Boilerfühler 1 Kurzschluss",
        _ => UNKNOWN_FAULT_TEXT,
    }
}

/// Current fault of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultState {
    pub number: i64,
    pub text: String,
    pub active: bool,
    /// Timestamp token of the last Set/Quit, or local time of an override.
    pub last_change: String,
}

impl FaultState {
    /// Channel values mirroring this state.
    pub fn channel_values(&self) -> Vec<(Channel, Value)> {
        vec![
            (channel::FAULT_NUMBER, Value::Integer(self.number)),
            (channel::FAULT_TEXT, Value::Text(self.text.clone())),
            (channel::FAULT_ACTIVE, Value::Boolean(self.active)),
            (channel::FAULT_LAST_CHANGE, Value::Text(self.last_change.clone())),
        ]
    }
}

/// Ignition and power fire bookkeeping of the burner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurnerTimingState {
    pub last_ignition_start: Option<NaiveTime>,
    pub last_power_fire_start: Option<NaiveTime>,
    pub ignition_count: i64,
    /// Seconds.
    pub last_ignition_duration: i64,
    /// Seconds.
    pub last_power_fire_duration: i64,
}

/// Reasons an event record is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unexpected fault transition {0:?}, expected Set or Quit")]
    UnexpectedTransition(String),

    #[error("Invalid fault number {0:?}")]
    InvalidFaultNumber(String),
}

/// Result of correlating one event record.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// Channel values changed by the event.
    pub updates: Vec<(Channel, Value)>,
    /// Set when a branch rejected the event. Other branches may still have
    /// produced updates.
    pub rejected: Option<EventError>,
}

/// Whether `subject` names the fault category ("Störung" in any of the
/// controller's transliterations).
pub fn is_fault_subject(subject: &str) -> bool {
    subject.starts_with("St") && subject.ends_with("rung")
}

/// Whether `event` is an ignition start ("Zündung" in any transliteration).
pub fn is_ignition(event: &str) -> bool {
    event.starts_with('Z') && event.contains("ndung")
}

/// Seconds from `start` to `end`. An `end` earlier than `start` is taken to
/// lie on the following day.
pub fn span_seconds(start: NaiveTime, end: NaiveTime) -> i64 {
    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        seconds + SECONDS_PER_DAY
    } else {
        seconds
    }
}

/// Correlate one `z` record against the shared state.
///
/// `line` is only used for diagnostics.
pub fn correlate_event<S: AsRef<str>>(
    tokens: &[S],
    line: &str,
    state: &SharedState,
) -> EventOutcome {
    let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
    debug!("Handling event record: fields:[{}]", tokens.join("|"));

    let mut outcome = EventOutcome::default();

    if tokens.len() < 3 {
        let e = EventError::MissingField("subject");
        warn!("Rejected event record: {} (line: {})", e, line.trim_end());
        outcome.rejected = Some(e);
        return outcome;
    }

    if tokens[2] == BOILER_SUBJECT
        && tokens.len() >= 4
        && let Some(timestamp) = parse_time_of_day(tokens[1])
    {
        outcome
            .updates
            .extend(burner_event(tokens[3], timestamp, state));
    }

    if is_fault_subject(tokens[2]) {
        match fault_event(&tokens, state) {
            Ok(updates) => outcome.updates.extend(updates),
            Err(e) => {
                warn!("Rejected fault event: {} (line: {})", e, line.trim_end());
                outcome.rejected = Some(e);
            }
        }
    } else {
        let message = tokens[2..].join(" ");
        state.set_message(message.clone());
        outcome
            .updates
            .push((channel::MESSAGE, Value::Text(message)));
    }

    outcome
}

fn burner_event(event: &str, timestamp: NaiveTime, state: &SharedState) -> Vec<(Channel, Value)> {
    let mut burner = state.burner();
    let mut updates = Vec::new();

    if is_ignition(event) {
        burner.last_ignition_start = Some(timestamp);
        burner.ignition_count += 1;
        updates.push((channel::IGNITION_COUNT, Value::Integer(burner.ignition_count)));
    } else if event == POWER_FIRE_MARKER {
        if let Some(start) = burner.last_ignition_start.take() {
            burner.last_ignition_duration = span_seconds(start, timestamp);
            updates.push((
                channel::LAST_IGNITION_DURATION,
                Value::Integer(burner.last_ignition_duration),
            ));
        }
        burner.last_power_fire_start = Some(timestamp);
    } else if event == OFF_MARKER {
        if let Some(start) = burner.last_power_fire_start.take() {
            burner.last_power_fire_duration = span_seconds(start, timestamp);
            updates.push((
                channel::LAST_POWER_FIRE_DURATION,
                Value::Integer(burner.last_power_fire_duration),
            ));
        }
    }

    updates
}

fn fault_event(tokens: &[&str], state: &SharedState) -> Result<Vec<(Channel, Value)>, EventError> {
    let transition = *tokens
        .get(3)
        .ok_or(EventError::MissingField("fault transition"))?;
    let active = match transition {
        "Set" => true,
        "Quit" => false,
        other => return Err(EventError::UnexpectedTransition(other.to_string())),
    };

    let raw_number = *tokens.get(4).ok_or(EventError::MissingField("fault number"))?;
    let number: i64 = raw_number
        .parse()
        .map_err(|_| EventError::InvalidFaultNumber(raw_number.to_string()))?;

    let text = fault_text(number);
    if active {
        info!("Fault {}: {}", number, text);
    } else {
        info!("Fault {} cleared: {}", number, text);
    }

    let fault = FaultState {
        number,
        text: text.to_string(),
        active,
        last_change: tokens[1].to_string(),
    };
    let updates = fault.channel_values();
    state.set_fault(fault);

    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` and return everything it logged.
    fn captured_logs(f: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn event(state: &SharedState, line: &str) -> EventOutcome {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        correlate_event(&tokens, line, state)
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_fault_text_known_and_unknown() {
        assert_eq!(fault_text(1), "Sicherung F25 defekt");
        assert_eq!(fault_text(7), "Endschalter Deckel offen");
        assert_eq!(fault_text(20), "Boilerfühler 1 Kurzschluss");
        assert_eq!(fault_text(0), UNKNOWN_FAULT_TEXT);
        assert_eq!(fault_text(21), UNKNOWN_FAULT_TEXT);
        assert_eq!(fault_text(999), UNKNOWN_FAULT_TEXT);
        assert_eq!(fault_text(-1), UNKNOWN_FAULT_TEXT);
    }

    #[test]
    fn test_fault_table_is_complete() {
        let expected = [
            "Sicherung F25 defekt",
            "Elektronischer Motorschutz Einschubschnecke ausgelöst",
            "Elektronischer Motorschutz Raumaustragung ausgelöst",
            "Elektronischer Motorschutz Ascheaustragung ausgelöst",
            "Sicherheitsthermostat (STB)",
            "Rücklaufzeit überschritten",
            "Endschalter Deckel offen",
            "Brennraum überfüllt",
            "Brandschutzklappe öffnet nicht",
            "Zündzeit überschritten",
            "Minimale Rauchgastemperatur unterschritten",
            "Initiator Entaschung",
            "Überstrom Einschubschnecke",
            "Überstrom Raumaustragung",
            "Überstrom Aschenaustragung",
            "Rauchgasfühler falsch angeschlossen",
            "Rauchgasfühler Unterbrechung",
            "Kesselfühler Kurzschluss",
            "Kesselfühler Unterbrechung",
            "Boilerfühler 1 Kurzschluss",
        ];
        for (number, text) in (1..).zip(expected) {
            assert_eq!(fault_text(number), text, "fault {}", number);
        }
    }

    #[test]
    fn test_fault_set_and_quit() {
        let state = SharedState::new();

        let outcome = event(&state, "z 18:39:41 Stoerung Set 7 Stop:1");
        assert!(outcome.rejected.is_none());
        let fault = state.fault_snapshot();
        assert_eq!(fault.number, 7);
        assert!(fault.active);
        assert_eq!(fault.text, fault_text(7));
        assert_eq!(fault.last_change, "18:39:41");

        event(&state, "z 18:40:16 Störung Quit 0007");
        let fault = state.fault_snapshot();
        assert_eq!(fault.number, 7);
        assert!(!fault.active);
        assert_eq!(fault.last_change, "18:40:16");
    }

    #[test]
    fn test_fault_event_updates_all_fault_channels() {
        let state = SharedState::new();
        let outcome = event(&state, "z 18:39:41 Störung Set 0007");
        let channels: Vec<_> = outcome.updates.iter().map(|(c, _)| c.id).collect();
        assert_eq!(channels, vec!["nr", "text", "active", "lastActive"]);
        assert!(
            outcome
                .updates
                .contains(&(channel::FAULT_ACTIVE, Value::Boolean(true)))
        );
    }

    #[test]
    fn test_fault_rejections_leave_state_unchanged() {
        let state = SharedState::new();
        event(&state, "z 18:39:41 Störung Set 7");
        let before = state.fault_snapshot();

        let outcome = event(&state, "z 18:41:00 Störung Reset 7");
        assert_eq!(
            outcome.rejected,
            Some(EventError::UnexpectedTransition("Reset".to_string()))
        );

        let outcome = event(&state, "z 18:42:00 Störung Quit x7");
        assert_eq!(
            outcome.rejected,
            Some(EventError::InvalidFaultNumber("x7".to_string()))
        );

        let outcome = event(&state, "z 18:43:00 Störung Quit");
        assert_eq!(
            outcome.rejected,
            Some(EventError::MissingField("fault number"))
        );

        let outcome = event(&state, "z 18:44:00 Störung");
        assert_eq!(
            outcome.rejected,
            Some(EventError::MissingField("fault transition"))
        );

        assert_eq!(state.fault_snapshot(), before);
    }

    #[test]
    fn test_fault_event_does_not_touch_message() {
        let state = SharedState::new();
        event(&state, "z 10:00:00 Kessel Betrieb");
        event(&state, "z 18:39:41 Störung Set 7");
        assert_eq!(state.message(), "Kessel Betrieb");
    }

    #[test]
    fn test_too_short_event_is_rejected() {
        let state = SharedState::new();
        let outcome = event(&state, "z 18:39:41");
        assert_eq!(outcome.rejected, Some(EventError::MissingField("subject")));
        assert!(outcome.updates.is_empty());
    }

    #[test]
    fn test_rejected_events_are_logged() {
        let state = SharedState::new();
        let logs = captured_logs(|| {
            event(&state, "z 18:39:41");
        });
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("Rejected event record"), "{}", logs);
        assert!(logs.contains("line: z 18:39:41"), "{}", logs);

        let logs = captured_logs(|| {
            event(&state, "z 18:41:00 Störung Reset 7");
        });
        assert!(logs.contains("Rejected fault event"), "{}", logs);
    }

    #[test]
    fn test_ignition_to_power_fire_duration() {
        let state = SharedState::new();

        event(&state, "z 14:10:40 Kessel Zündung");
        assert_eq!(state.burner_snapshot().ignition_count, 1);
        assert_eq!(
            state.burner_snapshot().last_ignition_start,
            Some(time(14, 10, 40))
        );

        let outcome = event(&state, "z 14:20:20 Kessel Leistungsbrand");
        let burner = state.burner_snapshot();
        assert_eq!(burner.last_ignition_duration, 580);
        assert_eq!(burner.ignition_count, 1);
        assert_eq!(burner.last_ignition_start, None);
        assert_eq!(burner.last_power_fire_start, Some(time(14, 20, 20)));
        assert!(
            outcome
                .updates
                .contains(&(channel::LAST_IGNITION_DURATION, Value::Integer(580)))
        );
    }

    #[test]
    fn test_alternate_ignition_spellings_count() {
        let state = SharedState::new();

        event(&state, "z 14:10:40 Kessel Zündung");
        event(&state, "z 14:20:20 Kessel Leistungsbrand");

        event(&state, "z 14:30:00 Kessel Zündungen");
        assert_eq!(state.burner_snapshot().ignition_count, 2);
        event(&state, "z 14:35:00 Kessel Leistungsbrand");
        assert_eq!(state.burner_snapshot().last_ignition_duration, 300);

        event(&state, "z 14:40:00 Kessel Zndung");
        assert_eq!(state.burner_snapshot().ignition_count, 3);
        event(&state, "z 14:45:00 Kessel Leistungsbrand");
        assert_eq!(state.burner_snapshot().last_ignition_duration, 300);

        event(&state, "z 18:00:32 Kessel Aus");
        assert_eq!(state.burner_snapshot().last_power_fire_duration, 11732);
        assert_eq!(state.burner_snapshot().last_power_fire_start, None);
    }

    #[test]
    fn test_reignition_overwrites_start_without_duration() {
        let state = SharedState::new();
        event(&state, "z 14:00:00 Kessel Zündung");
        let outcome = event(&state, "z 14:05:00 Kessel Zündung");
        assert!(
            !outcome
                .updates
                .iter()
                .any(|(c, _)| *c == channel::LAST_IGNITION_DURATION)
        );

        event(&state, "z 14:06:00 Kessel Leistungsbrand");
        let burner = state.burner_snapshot();
        assert_eq!(burner.ignition_count, 2);
        assert_eq!(burner.last_ignition_duration, 60);
    }

    #[test]
    fn test_power_fire_without_ignition_opens_span_only() {
        let state = SharedState::new();
        let outcome = event(&state, "z 14:45:00 Kessel Leistungsbrand");
        assert!(
            !outcome
                .updates
                .iter()
                .any(|(c, _)| *c == channel::LAST_IGNITION_DURATION)
        );
        assert_eq!(
            state.burner_snapshot().last_power_fire_start,
            Some(time(14, 45, 0))
        );
    }

    #[test]
    fn test_off_without_power_fire_is_ignored() {
        let state = SharedState::new();
        let outcome = event(&state, "z 18:00:32 Kessel Aus");
        assert_eq!(state.burner_snapshot(), BurnerTimingState::default());
        // Only the message fallback fires.
        assert_eq!(outcome.updates.len(), 1);
    }

    #[test]
    fn test_invalid_timestamp_skips_burner_branch() {
        let state = SharedState::new();
        event(&state, "z 14:10 Kessel Zündung");
        assert_eq!(state.burner_snapshot().ignition_count, 0);
        assert_eq!(state.message(), "Kessel Zündung");
    }

    #[test]
    fn test_span_across_midnight() {
        let state = SharedState::new();
        event(&state, "z 23:50:00 Kessel Leistungsbrand");
        event(&state, "z 00:10:00 Kessel Aus");
        assert_eq!(state.burner_snapshot().last_power_fire_duration, 1200);
        assert_eq!(span_seconds(time(23, 59, 59), time(0, 0, 1)), 2);
        assert_eq!(span_seconds(time(12, 0, 0), time(12, 0, 0)), 0);
    }

    #[test]
    fn test_burner_events_also_update_message() {
        let state = SharedState::new();
        let outcome = event(&state, "z 14:10:40 Kessel Zündung");
        assert_eq!(state.message(), "Kessel Zündung");
        assert!(
            outcome
                .updates
                .contains(&(channel::MESSAGE, Value::Text("Kessel Zündung".into())))
        );

        event(&state, "z 14:11:00 Kessel Nachlauf");
        assert_eq!(state.message(), "Kessel Nachlauf");
        assert_eq!(state.burner_snapshot().ignition_count, 1);
    }

    #[test]
    fn test_free_text_message_joins_tokens() {
        let state = SharedState::new();
        event(&state, "z 09:00:00 Boiler   1   Ladung   Ein");
        assert_eq!(state.message(), "Boiler 1 Ladung Ein");
    }

    #[test]
    fn test_subject_patterns() {
        assert!(is_fault_subject("Störung"));
        assert!(is_fault_subject("Stoerung"));
        assert!(is_fault_subject("Strung"));
        assert!(!is_fault_subject("störung"));
        assert!(!is_fault_subject("Störungen"));

        assert!(is_ignition("Zündung"));
        assert!(is_ignition("Zuendung"));
        assert!(is_ignition("Zndungen"));
        assert!(!is_ignition("zündung"));
        assert!(!is_ignition("Leistungsbrand"));
    }
}
