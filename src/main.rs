//! Hargassner Monitor - Decode boiler telemetry from the serial port and
//! publish it over MQTT.

use anyhow::{Context, Result};
use clap::Parser;
use hargassner_monitor::{
    api::{ApiState, start_server},
    bus::MqttBus,
    config::Config,
    homie::HomieDevice,
    metrics::ChannelGauges,
    monitor::Monitor,
    publisher::ChangeGatedPublisher,
    source::{SerialSource, SourceEvent},
    state::SharedState,
    stats::PipelineStats,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Time given to queued MQTT messages before the connection is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Hargassner Monitor - Publish boiler telemetry to an MQTT broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device the boiler is attached to
    #[arg(short, long, env = "HARGASSNER_SERIAL_DEVICE")]
    device: Option<String>,

    /// Port of the HTTP server (metrics, readiness, fault administration)
    #[arg(short, long, env = "HARGASSNER_MONITOR_PORT")]
    port: Option<u16>,

    /// MQTT broker, e.g. tcp://localhost:1883
    #[arg(short, long, env = "HARGASSNER_MQTT_BROKER")]
    broker: Option<String>,

    /// MQTT client id
    #[arg(long, env = "HARGASSNER_MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// MQTT username
    #[arg(long, env = "HARGASSNER_MQTT_USER")]
    mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "HARGASSNER_MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Print statistics every N seconds (0 = never)
    #[arg(short, long)]
    stats_interval: Option<u64>,

    /// Do not apply line settings to the serial device
    #[arg(long)]
    no_configure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&args, &mut config);
    config.validate().context("Invalid configuration")?;

    info!("Hargassner Monitor starting...");
    info!("Serial device: {}", config.serial.device);
    info!("MQTT broker: {}", config.mqtt.broker);

    let state = Arc::new(SharedState::new());
    let gauges = Arc::new(ChannelGauges::new());
    let stats = Arc::new(PipelineStats::new());

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C and SIGTERM
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to install signal handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Start stats printer
    if config.stats_interval > 0 {
        let stats_clone = Arc::clone(&stats);
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                println!("\n{}", stats_clone.summary());
            }
        });
    }

    // Start HTTP server
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let api_state = ApiState {
        state: Arc::clone(&state),
        gauges: Arc::clone(&gauges),
        stats: Arc::clone(&stats),
        control: control_tx,
    };
    let port = config.http.port;
    tokio::spawn(async move {
        if let Err(e) = start_server(port, api_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut lines = SerialSource::new(config.serial_config()).open().await?;

    let device = HomieDevice::new(
        config.mqtt.base_topic.clone(),
        config.mqtt.device_id.clone(),
        config.mqtt.device_name.clone(),
    );
    let mut connection = MqttBus::start(&config.mqtt_config(), &device)
        .context("Failed to set up MQTT client")?;

    let mut monitor = Monitor::new(
        ChangeGatedPublisher::new(connection.bus.clone(), device),
        state,
        gauges,
        Arc::clone(&stats),
    );

    // Main event loop
    loop {
        tokio::select! {
            // Check for shutdown
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            // Process serial lines
            event = lines.recv() => {
                match event {
                    Some(SourceEvent::Line(line)) => {
                        monitor.process_line(&line);
                    }
                    Some(SourceEvent::Error(e)) => {
                        error!("Serial source failed: {}", e);
                        break;
                    }
                    Some(SourceEvent::Closed) | None => {
                        info!("Serial source exhausted");
                        break;
                    }
                }
            }

            Some(event) = connection.events.recv() => {
                monitor.handle_bus_event(event);
            }

            Some(event) = control_rx.recv() => {
                monitor.handle_control(event);
            }
        }
    }

    monitor.shutdown();
    connection.disconnect(SHUTDOWN_GRACE).await;

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

/// Let command line arguments and environment variables win over the file.
fn apply_overrides(args: &Args, config: &mut Config) {
    if let Some(device) = &args.device {
        config.serial.device = device.clone();
    }
    if args.no_configure {
        config.serial.configure = false;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if let Some(broker) = &args.broker {
        config.mqtt.broker = broker.clone();
    }
    if let Some(client_id) = &args.client_id {
        config.mqtt.client_id = client_id.clone();
    }
    if let Some(user) = &args.mqtt_user {
        config.mqtt.username = user.clone();
    }
    if let Some(password) = &args.mqtt_password {
        config.mqtt.password = password.clone();
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval = interval;
    }
}
