//! Hargassner Monitor - A Rust library and service for decoding the telemetry
//! of Hargassner wood-chip boilers.
//!
//! The boiler controller writes two kinds of records to its serial port:
//! `pm` lines carrying a fixed-position vector of process values, and `z`
//! lines carrying timestamped events (burner transitions, faults).
//!
//! This crate provides:
//! - A nom-based tokenizer for the controller's line format
//! - Decoders for process value records and the event correlator
//! - A Homie-convention MQTT publisher with a change gate
//! - Statistics tracking with HDR histograms and Prometheus metrics
//! - An HTTP surface for readiness and manual fault administration
//!
//! # Example
//!
//! ```rust,no_run
//! use hargassner_monitor::{channel, decoder::ProcessValueRecord, parser::tokenize};
//! use hargassner_monitor::decoder::decode_process_values;
//!
//! let line = b"pm 100 50 7.5 72 141 3.5 4.0 55 45 60 50 20 48 30 55 0.1 0.1 0.1 \
//!              50 0 0 0 0 4.0 0.0 0.0 0 0 0 1.2 0.5 0.3\r\n";
//! let tokens = tokenize(line).expect("Failed to tokenize");
//!
//! let mut record = ProcessValueRecord::default();
//! decode_process_values(&tokens, &mut record).expect("Failed to decode");
//!
//! println!("{:?}", record.get(&channel::BOILER_TEMPERATURE));
//! ```

pub mod api;
pub mod bus;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod decoder;
pub mod homie;
pub mod metrics;
pub mod monitor;
pub mod parser;
pub mod publisher;
pub mod source;
pub mod state;
pub mod stats;

pub use api::{ApiState, start_server};
pub use bus::{BusEvent, MqttBus, MqttBusConfig, MqttConnection};
pub use channel::{Channel, Group, Value, ValueKind};
pub use config::Config;
pub use correlator::{EventError, FaultState, correlate_event, fault_text};
pub use decoder::{DecodeError, ProcessValueRecord, decode_process_values};
pub use homie::{DeviceState, HomieDevice};
pub use metrics::{ChannelGauges, format_prometheus_metrics};
pub use monitor::{ControlEvent, Monitor};
pub use parser::{RecordKind, TokenizeError, classify, tokenize};
pub use publisher::{BusPublisher, ChangeGatedPublisher};
pub use source::{SerialConfig, SerialSource, SourceEvent};
pub use state::SharedState;
pub use stats::{PipelineStats, StatsSummary};
