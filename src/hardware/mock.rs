//! Mock Hardware Implementations
//!
//! Provides a simulated instrument line for testing without physical hardware.
//! All mock delays use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! `MockTransport` answers `READ?` with a slowly rising current, records every
//! command it receives and keeps track of how many exchanges are in flight at
//! once, so tests can prove the busy token serializes access.

use crate::error::{AppResult, DaqError};
use crate::hardware::transport::{Reply, Transport};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

/// Commands received so far plus scripted failures.
#[derive(Debug, Default)]
struct MockLine {
    commands: Vec<(String, String)>,
    failing_commands: HashSet<String>,
    failing_reads: usize,
    garbage_reads: usize,
}

/// Simulated picoammeter on a serial line
///
/// # Example
///
/// ```rust,ignore
/// let transport = MockTransport::new().with_latency(Duration::from_millis(2));
/// transport.fail_on("SYSTem:ZCHeck 0");
/// ```
#[derive(Debug)]
pub struct MockTransport {
    line: Mutex<MockLine>,
    devices: Option<HashSet<String>>,
    latency: Duration,
    base_current: f64,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Mock that accepts any device name and answers instantly.
    pub fn new() -> Self {
        Self {
            line: Mutex::new(MockLine::default()),
            devices: None,
            latency: Duration::ZERO,
            base_current: 1.0e-9,
            reads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Only these device names can be opened; others fail like a missing port.
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    /// Time each exchange takes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Current returned by the first reading, in amperes.
    pub fn with_base_current(mut self, amps: f64) -> Self {
        self.base_current = amps;
        self
    }

    /// Make every exchange carrying exactly `command` fail.
    pub fn fail_on(&self, command: &str) {
        self.lock().failing_commands.insert(command.to_string());
    }

    /// Make the next `count` queries fail with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Make the next `count` queries return a non-numeric payload.
    pub fn garble_next_reads(&self, count: usize) {
        self.lock().garbage_reads = count;
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Every `(device, command)` pair received, in order.
    pub fn exchanges(&self) -> Vec<(String, String)> {
        self.lock().commands.clone()
    }

    /// Number of exchanges received.
    pub fn call_count(&self) -> usize {
        self.lock().commands.len()
    }

    /// Number of successful readings returned.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Highest number of exchanges ever observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockLine> {
        self.line.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reading(&self) -> String {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let amps = self.base_current * (1.0 + n as f64 * 0.01);
        format!("{:+.6E}A", amps)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        device_id: &str,
        command: &str,
        reply: Reply,
    ) -> AppResult<Option<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let outcome = self.exchange(device_id, command, reply).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl MockTransport {
    async fn exchange(
        &self,
        device_id: &str,
        command: &str,
        reply: Reply,
    ) -> AppResult<Option<String>> {
        if let Some(devices) = &self.devices {
            if !devices.contains(device_id) {
                return Err(DaqError::transport(device_id, "failed to open port: no such device"));
            }
        }

        // Decide the outcome up front; the line lock is never held across the sleep.
        let scripted = {
            let mut line = self.lock();
            line.commands
                .push((device_id.to_string(), command.to_string()));

            if line.failing_commands.contains(command) {
                Some(Err(DaqError::transport(device_id, "write failed")))
            } else if reply == Reply::Expected && line.failing_reads > 0 {
                line.failing_reads -= 1;
                Some(Err(DaqError::transport(device_id, "no response within 1s")))
            } else if reply == Reply::Expected && line.garbage_reads > 0 {
                line.garbage_reads -= 1;
                Some(Ok(Some("OVERFLOW".to_string())))
            } else {
                None
            }
        };

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        match scripted {
            Some(outcome) => outcome,
            None if reply == Reply::Expected => Ok(Some(self.reading())),
            None => Ok(None),
        }
    }
}
