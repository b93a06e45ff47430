//! Serial Transport
//!
//! One request/response exchange per call: open the port, write the framed
//! command, optionally read one response line, close the port. No connection
//! is held between calls and nothing is retried here.

use crate::config::SerialConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::keithley::FIELD_SEPARATOR;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(feature = "instrument_serial")]
use tokio_serial::SerialPortBuilderExt;

/// Whether a command produces a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Read one line after writing.
    Expected,
    /// Write only.
    Ignored,
}

/// Capability: one half-duplex exchange with a named device
///
/// # Contract
/// - The device connection is scoped to the call and released on every path
/// - Implementations never retry; retry policy belongs to the caller
/// - Callers serialize access themselves (see [`crate::acquisition::InstrumentLink`])
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write `command` to `device_id` and, for [`Reply::Expected`], return the
    /// response payload (the text before the first field separator).
    async fn execute(&self, device_id: &str, command: &str, reply: Reply)
        -> AppResult<Option<String>>;

    /// Send a query and return its payload.
    async fn query(&self, device_id: &str, command: &str) -> AppResult<String> {
        self.execute(device_id, command, Reply::Expected)
            .await?
            .ok_or_else(|| DaqError::transport(device_id, "no response"))
    }

    /// Send a command that produces no response.
    async fn send(&self, device_id: &str, command: &str) -> AppResult<()> {
        self.execute(device_id, command, Reply::Ignored).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(
        &self,
        device_id: &str,
        command: &str,
        reply: Reply,
    ) -> AppResult<Option<String>> {
        (**self).execute(device_id, command, reply).await
    }
}

/// Builder for constructing a [`SerialTransport`] with custom line settings
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use keithley_daq::hardware::transport::SerialTransportBuilder;
///
/// let transport = SerialTransportBuilder::new(9600)
///     .with_timeout(Duration::from_millis(500))
///     .build();
/// ```
pub struct SerialTransportBuilder {
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    field_separator: char,
}

impl SerialTransportBuilder {
    /// Create a new builder
    ///
    /// Default configuration:
    /// * timeout: 1 second
    /// * line_terminator: "\r\n"
    /// * field_separator: ','
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n".to_string(),
            field_separator: FIELD_SEPARATOR,
        }
    }

    /// Start from the `[serial]` configuration section.
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.baud_rate)
            .with_timeout(config.timeout())
            .with_line_terminator(config.line_terminator.clone())
    }

    /// Set the read timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the line terminator appended to commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Set the separator that ends the response payload
    pub fn with_field_separator(mut self, separator: char) -> Self {
        self.field_separator = separator;
        self
    }

    /// Build the transport with the configured settings
    pub fn build(self) -> SerialTransport {
        SerialTransport {
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            line_terminator: self.line_terminator,
            field_separator: self.field_separator,
        }
    }
}

/// RS-232 / USB-serial transport (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    field_separator: char,
}

impl SerialTransport {
    /// Transport with default line settings at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        SerialTransportBuilder::new(baud_rate).build()
    }

    /// Command text as it goes on the wire.
    pub fn frame(&self, command: &str) -> String {
        format!("{}{}", command, self.line_terminator)
    }

    /// Strip terminators and keep the text before the first field separator.
    pub fn decode(&self, line: &str) -> String {
        line.trim()
            .split(self.field_separator)
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    #[cfg(feature = "instrument_serial")]
    async fn execute(
        &self,
        device_id: &str,
        command: &str,
        reply: Reply,
    ) -> AppResult<Option<String>> {
        let stream = tokio_serial::new(device_id, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| DaqError::transport(device_id, format!("failed to open port: {}", e)))?;

        // Dropping the reader closes the port, whichever way we leave.
        let mut port = BufReader::new(stream);

        port.get_mut()
            .write_all(self.frame(command).as_bytes())
            .await
            .map_err(|e| DaqError::transport(device_id, format!("write failed: {}", e)))?;
        port.get_mut()
            .flush()
            .await
            .map_err(|e| DaqError::transport(device_id, format!("flush failed: {}", e)))?;
        debug!(device = device_id, command, "Command sent");

        if reply == Reply::Ignored {
            return Ok(None);
        }

        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, port.read_line(&mut line))
            .await
            .map_err(|_| {
                DaqError::transport(device_id, format!("no response within {:?}", self.timeout))
            })?
            .map_err(|e| DaqError::transport(device_id, format!("read failed: {}", e)))?;

        if read == 0 {
            return Err(DaqError::transport(
                device_id,
                "port closed before a response arrived",
            ));
        }

        let payload = self.decode(&line);
        debug!(device = device_id, command, response = %payload, "Response received");
        Ok(Some(payload))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn execute(
        &self,
        _device_id: &str,
        _command: &str,
        _reply: Reply,
    ) -> AppResult<Option<String>> {
        Err(DaqError::SerialFeatureDisabled)
    }
}
