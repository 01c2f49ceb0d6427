//! MQTT adapter for the pub/sub bus.
//!
//! Publishes go through a non-blocking `try_publish`; the rumqttc event loop
//! runs in a background task that reconnects on its own and reports
//! connection transitions as [`BusEvent`]s, which the reader loop feeds to the
//! change gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MQTT_PORT, parse_broker_url};
use crate::homie::{DeviceState, HomieDevice};
use crate::publisher::BusPublisher;

/// Connection transitions of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker accepted the connection.
    Connected,

    /// The connection dropped. The client keeps reconnecting.
    ConnectionLost(String),
}

/// Configuration for the MQTT bus.
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    /// Broker address, `tcp://host:port`.
    pub broker: String,

    pub client_id: String,

    /// Username; empty for anonymous access.
    pub username: String,

    pub password: String,

    /// Keep alive interval.
    pub keep_alive: Duration,

    /// Delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            broker: format!("tcp://localhost:{}", DEFAULT_MQTT_PORT),
            client_id: "hargassner-monitor".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Publishing handle of the MQTT connection.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
}

impl BusPublisher for MqttBus {
    fn publish(&self, topic: &str, payload: &str, retained: bool) {
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, retained, payload.as_bytes().to_vec())
        {
            debug!("Dropping publish to {}: {}", topic, e);
        }
    }
}

/// A running MQTT connection.
pub struct MqttConnection {
    pub bus: MqttBus,
    pub events: mpsc::Receiver<BusEvent>,
    task: JoinHandle<()>,
}

impl MqttBus {
    /// Start the MQTT client. The connection is established in the
    /// background; watch the returned events for [`BusEvent::Connected`].
    pub fn start(config: &MqttBusConfig, device: &HomieDevice) -> Result<MqttConnection> {
        let (host, port) = parse_broker_url(&config.broker)?;
        info!("Connecting to MQTT broker {}:{}", host, port);

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(config.keep_alive);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        options.set_last_will(LastWill::new(
            device.state_topic(),
            DeviceState::Lost.to_string(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, 256);
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(run_event_loop(
            eventloop,
            tx,
            Arc::clone(&closing),
            config.reconnect_delay,
        ));

        Ok(MqttConnection {
            bus: MqttBus { client, closing },
            events: rx,
            task,
        })
    }
}

impl MqttConnection {
    /// Disconnect from the broker, giving queued messages `grace` to drain.
    pub async fn disconnect(self, grace: Duration) {
        self.bus.closing.store(true, Ordering::Relaxed);
        if let Err(e) = self.bus.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
        if tokio::time::timeout(grace, self.task).await.is_err() {
            debug!("MQTT event loop did not finish within {:?}", grace);
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<BusEvent>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                if tx.send(BusEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::Relaxed) {
                    break;
                }
                if connected {
                    connected = false;
                    if tx.send(BusEvent::ConnectionLost(e.to_string())).await.is_err() {
                        break;
                    }
                } else {
                    warn!("MQTT connection failed: {}", e);
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
