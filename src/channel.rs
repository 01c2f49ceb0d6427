//! Channel declarations and typed values.
//!
//! A [`Channel`] names one measurable or stateful quantity of the boiler.
//! Every channel is declared exactly once, below, together with its group
//! (the Homie node it is published under), its names, its unit and the
//! [`ValueKind`] that governs how tokens are parsed, how values are rendered
//! on the bus and how they are exported as gauges.

use serde::Serialize;
use std::fmt;

/// The Homie node a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Group {
    ProcessValues,
    HeatingCircuit1,
    HeatingCircuit2,
    Fault,
    Boiler,
}

impl Group {
    /// All groups, in node declaration order.
    pub const ALL: [Group; 5] = [
        Group::ProcessValues,
        Group::HeatingCircuit1,
        Group::HeatingCircuit2,
        Group::Fault,
        Group::Boiler,
    ];

    /// Node identifier used in topics and gauge names.
    pub fn id(&self) -> &'static str {
        match self {
            Group::ProcessValues => "prozesswerte",
            Group::HeatingCircuit1 => "heizkreis1",
            Group::HeatingCircuit2 => "heizkreis2",
            Group::Fault => "stoerung",
            Group::Boiler => "kessel",
        }
    }

    /// Human readable node name.
    pub fn name(&self) -> &'static str {
        match self {
            Group::ProcessValues => "Prozesswerte",
            Group::HeatingCircuit1 => "Heizkreis 1",
            Group::HeatingCircuit2 => "Heizkreis 2",
            Group::Fault => "Störung",
            Group::Boiler => "Kessel",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The declared kind of a channel's value. Fixed at declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Real,
    Text,
    Boolean,
}

impl ValueKind {
    /// Parse a raw token into a value of this kind.
    pub fn parse(&self, token: &str) -> Result<Value, ValueError> {
        match self {
            ValueKind::Integer => token
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| ValueError::NotAnInteger(token.to_string())),
            ValueKind::Real => token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::Real)
                .ok_or_else(|| ValueError::NotAReal(token.to_string())),
            ValueKind::Text => Ok(Value::Text(token.to_string())),
            ValueKind::Boolean => match token {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(ValueError::NotABoolean(token.to_string())),
            },
        }
    }

    /// Homie `$datatype` attribute value.
    pub fn datatype(&self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Real => "float",
            ValueKind::Text => "string",
            ValueKind::Boolean => "boolean",
        }
    }

    /// Whether values of this kind are exported as gauges.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueKind::Text)
    }
}

/// Errors converting a raw token into a [`Value`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("not an integer: {0:?}")]
    NotAnInteger(String),

    #[error("not a real number: {0:?}")]
    NotAReal(String),

    #[error("not a boolean: {0:?}")]
    NotABoolean(String),
}

/// A typed channel value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    /// No value available. Rendered as blank text.
    Absent,
}

impl Value {
    /// Canonical textual form forwarded to the bus.
    pub fn canonical(&self) -> String {
        match self {
            Value::Absent => String::new(),
            other => other.to_string(),
        }
    }

    /// Gauge reading for this value, if it has one.
    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Absent => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Absent => Ok(()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// A declared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Channel {
    pub group: Group,
    pub id: &'static str,
    pub name_en: &'static str,
    pub name_de: &'static str,
    pub unit: &'static str,
    pub kind: ValueKind,
}

impl Channel {
    const fn new(
        group: Group,
        id: &'static str,
        name_en: &'static str,
        name_de: &'static str,
        unit: &'static str,
        kind: ValueKind,
    ) -> Self {
        Self {
            group,
            id,
            name_en,
            name_de,
            unit,
            kind,
        }
    }

    /// Unique key of this channel: `group/id`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.group.id(), self.id)
    }

    /// Deterministic gauge name: `hargassner_<group>_<id>`.
    pub fn gauge_name(&self) -> String {
        format!("hargassner_{}_{}", self.group.id(), self.id.replace('-', "_"))
    }
}

use Group::{Boiler, Fault, HeatingCircuit1, HeatingCircuit2, ProcessValues};
use ValueKind::{Boolean, Integer, Real, Text};

pub const PRIMARY_AIR_FAN: Channel = Channel::new(
    ProcessValues,
    "primaerLuftGeblaese",
    "Primary Air Fan",
    "Primärluftgebläse",
    "%",
    Integer,
);
pub const EXHAUST_FAN: Channel = Channel::new(
    ProcessValues,
    "saugluftGeblaese",
    "Exhaust Fan",
    "Saugluftgebläse",
    "%",
    Integer,
);
pub const O2_IN_EXHAUST_GAS: Channel = Channel::new(
    ProcessValues,
    "o2InAbgas",
    "O2 in Exhaust Gas",
    "O2 im Abgas",
    "%",
    Real,
);
pub const BOILER_TEMPERATURE: Channel = Channel::new(
    ProcessValues,
    "kesselTemperatur",
    "Boiler Temperature",
    "Kesseltemperatur",
    "°C",
    Integer,
);
pub const EXHAUST_GAS_TEMPERATURE: Channel = Channel::new(
    ProcessValues,
    "rauchgasTemperatur",
    "Exhaust Gas Temperature",
    "Rauchgastemperatur",
    "°C",
    Integer,
);
pub const OUTDOOR_TEMPERATURE_CURRENT: Channel = Channel::new(
    ProcessValues,
    "aussenTemperaturAktuell",
    "Current Outdoor Temperature",
    "Außentemperatur aktuell",
    "°C",
    Real,
);
pub const OUTDOOR_TEMPERATURE_AVERAGE: Channel = Channel::new(
    ProcessValues,
    "aussenTemperaturGemittelt",
    "Average Outdoor Temperature",
    "Außentemperatur gemittelt",
    "°C",
    Real,
);
pub const FLOW_TEMPERATURE_CIRCUIT_1: Channel = Channel::new(
    HeatingCircuit1,
    "vorlaufTemperatur",
    "Flow Temperature Circuit 1",
    "Vorlauftemperatur Kreis 1",
    "°C",
    Real,
);
pub const FLOW_TEMPERATURE_CIRCUIT_2: Channel = Channel::new(
    HeatingCircuit2,
    "vorlaufTemperatur",
    "Flow Temperature Circuit 2",
    "Vorlauftemperatur Kreis 2",
    "°C",
    Real,
);
pub const FLOW_SET_TEMPERATURE_CIRCUIT_1: Channel = Channel::new(
    HeatingCircuit1,
    "vorlaufSollTemperatur",
    "Flow Temperature Circuit 1 Set",
    "Soll-Vorlauftemperatur Kreis 1",
    "°C",
    Real,
);
pub const FLOW_SET_TEMPERATURE_CIRCUIT_2: Channel = Channel::new(
    HeatingCircuit2,
    "vorlaufSollTemperatur",
    "Flow Temperature Circuit 2 Set",
    "Soll-Vorlauftemperatur Kreis 2",
    "°C",
    Real,
);
pub const RETURN_BOILER_2_BUFFER: Channel = Channel::new(
    ProcessValues,
    "ruecklaufBoiler2",
    "Return Boiler to Buffer Temperature",
    "Rücklauftemperatur Boiler2",
    "°C",
    Integer,
);
pub const BOILER_1_TEMPERATURE: Channel = Channel::new(
    ProcessValues,
    "boiler1Temperatur",
    "Boiler Temperature 1",
    "Kesseltemperatur 1",
    "°C",
    Integer,
);
pub const FEED_RATE: Channel = Channel::new(
    ProcessValues,
    "foerderMenge",
    "Feed Rate",
    "Fördermenge",
    "%",
    Integer,
);
pub const BOILER_1_SET_TEMPERATURE: Channel = Channel::new(
    ProcessValues,
    "boiler1SollTemperatur",
    "Boiler1 Set Temperature",
    "Solltemperatur Boiler1",
    "°C",
    Integer,
);
pub const UNDERPRESSURE_CURRENT: Channel = Channel::new(
    ProcessValues,
    "unterdruckAktuell",
    "Current Underpressure",
    "Unterdruck aktuell",
    "Pa",
    Real,
);
pub const UNDERPRESSURE_AVERAGE: Channel = Channel::new(
    ProcessValues,
    "unterdruckGemittelt",
    "Average Underpressure",
    "Unterdruck gemittelt",
    "Pa",
    Real,
);
pub const UNDERPRESSURE_SET: Channel = Channel::new(
    ProcessValues,
    "unterdruckSoll",
    "Set Underpressure",
    "Soll-Unterdruck",
    "Pa",
    Real,
);
pub const BOILER_2_TEMPERATURE_SM: Channel = Channel::new(
    ProcessValues,
    "BoilerTemperature2SM",
    "Boiler Temperature 2",
    "Boilertemperatur 2",
    "°C",
    Real,
);
pub const CIRCUIT_1_FR25: Channel = Channel::new(
    HeatingCircuit1,
    "HK1FR25",
    "HK1 FR25",
    "HK1 FR25",
    "°C",
    Real,
);
pub const CIRCUIT_2_FR25: Channel = Channel::new(
    HeatingCircuit2,
    "HK2FR25",
    "HK2 FR25",
    "HK2 FR25",
    "°C",
    Real,
);
pub const MOTOR_CURRENT_FEED_SCREW: Channel = Channel::new(
    ProcessValues,
    "stromEinschub",
    "Motor Current Feed Screw",
    "Strom Einschub",
    "A",
    Real,
);
pub const MOTOR_CURRENT_ASH_DISCHARGE: Channel = Channel::new(
    ProcessValues,
    "stromAscheaustragung",
    "Motor Current Ash Discharge",
    "Strom Ascheaustragung",
    "A",
    Real,
);
pub const MOTOR_CURRENT_ROOM_DISCHARGE: Channel = Channel::new(
    ProcessValues,
    "stromRaumaustragung",
    "Motor Current Room Discharge",
    "Strom Raumaustragung",
    "A",
    Real,
);

pub const MESSAGE: Channel = Channel::new(ProcessValues, "meldung", "Message", "Meldung", "", Text);

pub const FAULT_NUMBER: Channel = Channel::new(
    Fault,
    "nr",
    "Error Number",
    "Störungsnummer",
    "",
    Integer,
);
pub const FAULT_TEXT: Channel = Channel::new(Fault, "text", "Error Text", "Störungstext", "", Text);
pub const FAULT_ACTIVE: Channel = Channel::new(
    Fault,
    "active",
    "Error Active",
    "Störung Aktiv",
    "",
    Boolean,
);
pub const FAULT_LAST_CHANGE: Channel = Channel::new(
    Fault,
    "lastActive",
    "Last Active",
    "Letzte Aktivität",
    "",
    Text,
);

pub const LAST_IGNITION_DURATION: Channel = Channel::new(
    Boiler,
    "DauerLetzteZuendung",
    "Duration Last Ignition",
    "Dauer letzte Zündung",
    "s",
    Integer,
);
pub const LAST_POWER_FIRE_DURATION: Channel = Channel::new(
    Boiler,
    "DauerLetzterLeistungsbrand",
    "Duration Last Power Fire",
    "Dauer letzter Leistungsbrand",
    "s",
    Integer,
);
pub const IGNITION_COUNT: Channel = Channel::new(
    Boiler,
    "AnzahlZuendungen",
    "Number of Ignitions",
    "Anzahl Zündungen",
    "",
    Integer,
);

/// Every declared channel, in registration order.
pub const ALL_CHANNELS: &[Channel] = &[
    PRIMARY_AIR_FAN,
    EXHAUST_FAN,
    O2_IN_EXHAUST_GAS,
    BOILER_TEMPERATURE,
    EXHAUST_GAS_TEMPERATURE,
    OUTDOOR_TEMPERATURE_CURRENT,
    OUTDOOR_TEMPERATURE_AVERAGE,
    FLOW_TEMPERATURE_CIRCUIT_1,
    FLOW_TEMPERATURE_CIRCUIT_2,
    FLOW_SET_TEMPERATURE_CIRCUIT_1,
    FLOW_SET_TEMPERATURE_CIRCUIT_2,
    RETURN_BOILER_2_BUFFER,
    BOILER_1_TEMPERATURE,
    FEED_RATE,
    BOILER_1_SET_TEMPERATURE,
    UNDERPRESSURE_CURRENT,
    UNDERPRESSURE_AVERAGE,
    UNDERPRESSURE_SET,
    BOILER_2_TEMPERATURE_SM,
    CIRCUIT_1_FR25,
    CIRCUIT_2_FR25,
    MOTOR_CURRENT_FEED_SCREW,
    MOTOR_CURRENT_ASH_DISCHARGE,
    MOTOR_CURRENT_ROOM_DISCHARGE,
    MESSAGE,
    FAULT_NUMBER,
    FAULT_TEXT,
    FAULT_ACTIVE,
    FAULT_LAST_CHANGE,
    LAST_IGNITION_DURATION,
    LAST_POWER_FIRE_DURATION,
    IGNITION_COUNT,
];

/// Channels belonging to `group`, in registration order.
pub fn channels_in(group: Group) -> impl Iterator<Item = &'static Channel> {
    ALL_CHANNELS.iter().filter(move |c| c.group == group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_channel_keys_are_unique() {
        let keys: HashSet<String> = ALL_CHANNELS.iter().map(Channel::key).collect();
        assert_eq!(keys.len(), ALL_CHANNELS.len());
    }

    #[test]
    fn test_gauge_names_are_unique_per_group() {
        assert_eq!(
            FLOW_TEMPERATURE_CIRCUIT_1.gauge_name(),
            "hargassner_heizkreis1_vorlaufTemperatur"
        );
        assert_eq!(
            FLOW_TEMPERATURE_CIRCUIT_2.gauge_name(),
            "hargassner_heizkreis2_vorlaufTemperatur"
        );
    }

    #[test]
    fn test_parse_by_kind() {
        assert_eq!(ValueKind::Integer.parse("0007"), Ok(Value::Integer(7)));
        assert_eq!(ValueKind::Integer.parse("-3"), Ok(Value::Integer(-3)));
        assert!(ValueKind::Integer.parse("7.5").is_err());
        assert_eq!(ValueKind::Real.parse("21.5"), Ok(Value::Real(21.5)));
        assert!(ValueKind::Real.parse("abc").is_err());
        assert!(ValueKind::Real.parse("NaN").is_err());
        assert_eq!(ValueKind::Text.parse("x"), Ok(Value::Text("x".into())));
        assert_eq!(ValueKind::Boolean.parse("true"), Ok(Value::Boolean(true)));
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(Value::Integer(0).canonical(), "0");
        assert_eq!(Value::Real(21.5).canonical(), "21.5");
        assert_eq!(Value::Real(3.0).canonical(), "3");
        assert_eq!(Value::Boolean(false).canonical(), "false");
        assert_eq!(Value::Absent.canonical(), "");
    }

    #[test]
    fn test_gauge_export() {
        assert_eq!(Value::Boolean(true).as_gauge(), Some(1.0));
        assert_eq!(Value::Integer(42).as_gauge(), Some(42.0));
        assert_eq!(Value::Text("x".into()).as_gauge(), None);
        assert!(!ValueKind::Text.is_numeric());
    }

    #[test]
    fn test_channels_in_group() {
        let fault: Vec<_> = channels_in(Group::Fault).map(|c| c.id).collect();
        assert_eq!(fault, vec!["nr", "text", "active", "lastActive"]);
    }
}
