//! Serial line source.
//!
//! The boiler controller writes its telemetry to an RS-232 port. The device
//! node is read as a plain byte stream; baud rate and framing are applied
//! out-of-band with `stty` before opening. Lines are handed to the reader loop
//! as raw bytes, since fault texts may carry Latin-1 bytes.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Configuration for the serial source.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial device path.
    pub device: PathBuf,

    pub baud_rate: u32,

    pub parity: Parity,

    pub data_bits: u8,

    pub stop_bits: u8,

    /// Whether to apply the line settings with `stty` before opening.
    pub configure: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 19200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            configure: true,
        }
    }
}

impl SerialConfig {
    /// `stty` arguments for these line settings, raw mode, no echo.
    pub fn stty_args(&self) -> Vec<String> {
        let mut args = vec![
            "-F".to_string(),
            self.device.display().to_string(),
            self.baud_rate.to_string(),
            format!("cs{}", self.data_bits),
        ];
        args.extend(
            match self.parity {
                Parity::None => ["-parenb", "-parodd"],
                Parity::Even => ["parenb", "-parodd"],
                Parity::Odd => ["parenb", "parodd"],
            }
            .map(str::to_string),
        );
        args.push(if self.stop_bits == 2 { "cstopb" } else { "-cstopb" }.to_string());
        args.extend(["raw", "-echo"].map(str::to_string));
        args
    }
}

/// Events from the serial source.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// A raw line, including its terminator.
    Line(Vec<u8>),

    /// The stream ended.
    Closed,

    /// Reading failed. The source is finished.
    Error(String),
}

/// Serial telemetry source.
pub struct SerialSource {
    config: SerialConfig,
}

impl SerialSource {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Open the device and start streaming lines.
    ///
    /// Returns a receiver channel that will receive `SourceEvent`s. Reading
    /// runs in a background task and stops for good at end of stream or on
    /// the first read error.
    pub async fn open(self) -> Result<mpsc::Receiver<SourceEvent>> {
        if self.config.configure {
            self.apply_line_settings().await?;
        }

        let file = tokio::fs::File::open(&self.config.device)
            .await
            .with_context(|| format!("Could not open {}", self.config.device.display()))?;
        info!("Reading from {}", self.config.device.display());

        let (tx, rx) = mpsc::channel(1000);
        tokio::spawn(async move {
            stream_lines(BufReader::new(file), tx).await;
        });

        Ok(rx)
    }

    async fn apply_line_settings(&self) -> Result<()> {
        let args = self.config.stty_args();
        debug!("Running stty {}", args.join(" "));

        let status = Command::new("stty")
            .args(&args)
            .status()
            .await
            .context("Failed to run stty")?;
        if !status.success() {
            bail!(
                "stty failed for {} ({})",
                self.config.device.display(),
                status
            );
        }
        Ok(())
    }
}

/// Forward lines from `reader` until end of stream or a read error.
///
/// The first line is discarded: after opening, the stream starts in the
/// middle of whatever the controller was sending.
pub async fn stream_lines<R: AsyncBufRead + Unpin>(mut reader: R, tx: mpsc::Sender<SourceEvent>) {
    let mut buf = Vec::with_capacity(256);
    let mut first = true;

    loop {
        buf.clear();

        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("Serial stream closed");
                let _ = tx.send(SourceEvent::Closed).await;
                return;
            }
            Ok(_) => {
                if first {
                    first = false;
                    debug!("Discarding first line: {}", String::from_utf8_lossy(&buf).trim_end());
                    continue;
                }
                if tx.send(SourceEvent::Line(buf.clone())).await.is_err() {
                    // Receiver dropped
                    return;
                }
            }
            Err(e) => {
                error!("Error reading from serial: {}", e);
                let _ = tx.send(SourceEvent::Error(e.to_string())).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<SourceEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        stream_lines(BufReader::new(input), tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_line_is_discarded() {
        let events = collect(b"0 garbage\npm 1 2\nz 14:10:40 Kessel Aus\n").await;
        assert_eq!(
            events,
            vec![
                SourceEvent::Line(b"pm 1 2\n".to_vec()),
                SourceEvent::Line(b"z 14:10:40 Kessel Aus\n".to_vec()),
                SourceEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_high_bit_bytes_are_kept() {
        let events = collect(b"x\nz 1 St\xf6rung\n").await;
        assert_eq!(events[0], SourceEvent::Line(b"z 1 St\xf6rung\n".to_vec()));
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_delivered() {
        let events = collect(b"x\npm 1").await;
        assert_eq!(
            events,
            vec![SourceEvent::Line(b"pm 1".to_vec()), SourceEvent::Closed]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_closes() {
        assert_eq!(collect(b"").await, vec![SourceEvent::Closed]);
    }

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.device, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.parity, Parity::None);
    }

    #[test]
    fn test_stty_args() {
        let args = SerialConfig::default().stty_args();
        assert_eq!(
            args,
            vec![
                "-F",
                "/dev/ttyUSB0",
                "19200",
                "cs8",
                "-parenb",
                "-parodd",
                "-cstopb",
                "raw",
                "-echo",
            ]
        );

        let config = SerialConfig {
            parity: Parity::Odd,
            stop_bits: 2,
            data_bits: 7,
            ..Default::default()
        };
        let args = config.stty_args();
        assert!(args.contains(&"parenb".to_string()));
        assert!(args.contains(&"parodd".to_string()));
        assert!(args.contains(&"cstopb".to_string()));
        assert!(args.contains(&"cs7".to_string()));
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let source = SerialSource::new(SerialConfig {
            device: PathBuf::from("/nonexistent/tty"),
            configure: false,
            ..Default::default()
        });
        assert!(source.open().await.is_err());
    }
}
