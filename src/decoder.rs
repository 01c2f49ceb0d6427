//! Positional decoder for `pm` process value records.
//!
//! A `pm` line carries one reading per token. Each declared process value
//! channel is bound to a fixed token index; the binding is the table
//! [`PROCESS_VALUE_LAYOUT`]. Indices 19–22 and 26–28 belong to heating
//! circuits 3 and 4 (or are unused) and are not bound.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::channel::{self, Channel, Value};

/// Minimum token count of a `pm` record (the widest known layout).
pub const MIN_PROCESS_VALUE_TOKENS: usize = 32;

/// Token index → channel bindings of a `pm` record.
pub const PROCESS_VALUE_LAYOUT: &[(usize, Channel)] = &[
    (1, channel::PRIMARY_AIR_FAN),
    (2, channel::EXHAUST_FAN),
    (3, channel::O2_IN_EXHAUST_GAS),
    (4, channel::BOILER_TEMPERATURE),
    (5, channel::EXHAUST_GAS_TEMPERATURE),
    (6, channel::OUTDOOR_TEMPERATURE_CURRENT),
    (7, channel::OUTDOOR_TEMPERATURE_AVERAGE),
    (8, channel::FLOW_TEMPERATURE_CIRCUIT_1),
    (9, channel::FLOW_TEMPERATURE_CIRCUIT_2),
    (10, channel::FLOW_SET_TEMPERATURE_CIRCUIT_1),
    (11, channel::FLOW_SET_TEMPERATURE_CIRCUIT_2),
    (12, channel::RETURN_BOILER_2_BUFFER),
    (13, channel::BOILER_1_TEMPERATURE),
    (14, channel::FEED_RATE),
    (15, channel::BOILER_1_SET_TEMPERATURE),
    (16, channel::UNDERPRESSURE_CURRENT),
    (17, channel::UNDERPRESSURE_AVERAGE),
    (18, channel::UNDERPRESSURE_SET),
    (23, channel::BOILER_2_TEMPERATURE_SM),
    (24, channel::CIRCUIT_1_FR25),
    (25, channel::CIRCUIT_2_FR25),
    (29, channel::MOTOR_CURRENT_FEED_SCREW),
    (30, channel::MOTOR_CURRENT_ASH_DISCHARGE),
    (31, channel::MOTOR_CURRENT_ROOM_DISCHARGE),
];

/// Errors that reject a whole `pm` record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Not enough fields: got {got}, need at least {min}")]
    NotEnoughFields { got: usize, min: usize },
}

/// Latest value of every process value channel.
#[derive(Debug, Clone, Default)]
pub struct ProcessValueRecord {
    values: BTreeMap<String, Value>,
}

impl ProcessValueRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `channel`, if one was ever decoded.
    pub fn get(&self, channel: &Channel) -> Option<&Value> {
        self.values.get(&channel.key())
    }

    /// Number of channels holding a value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, channel: &Channel, value: Value) {
        self.values.insert(channel.key(), value);
    }
}

/// Outcome of decoding one well-formed `pm` record.
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Channels that decoded, with their new values.
    pub updates: Vec<(Channel, Value)>,
    /// Channels whose token failed conversion and kept their previous value.
    pub skipped: Vec<Channel>,
}

/// Decode a `pm` token sequence into `record`.
///
/// Lines shorter than [`MIN_PROCESS_VALUE_TOKENS`] are rejected and leave
/// `record` untouched. A token that does not convert to its channel's kind
/// skips only that channel.
pub fn decode_process_values<S: AsRef<str>>(
    tokens: &[S],
    record: &mut ProcessValueRecord,
) -> Result<DecodeReport, DecodeError> {
    if tokens.len() < MIN_PROCESS_VALUE_TOKENS {
        return Err(DecodeError::NotEnoughFields {
            got: tokens.len(),
            min: MIN_PROCESS_VALUE_TOKENS,
        });
    }

    let mut report = DecodeReport::default();

    for (index, channel) in PROCESS_VALUE_LAYOUT {
        let token = tokens[*index].as_ref();
        match channel.kind.parse(token) {
            Ok(value) => {
                record.set(channel, value.clone());
                report.updates.push((*channel, value));
            }
            Err(e) => {
                warn!(
                    "Invalid field[{}] [{}]: {} (fields: {})",
                    index,
                    channel.id,
                    e,
                    join_fields(tokens)
                );
                report.skipped.push(*channel);
            }
        }
    }

    Ok(report)
}

fn join_fields<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("|")
}
