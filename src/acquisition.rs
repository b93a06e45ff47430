//! Acquisition scheduler
//!
//! Runs the continuous sampling loop on its own tokio task while foreground
//! callers keep issuing configuration commands on the same serial line.
//!
//! # Exclusive access
//!
//! [`InstrumentLink`] owns the transport behind a single async mutex (the busy
//! token). Every exchange happens with the token held:
//!
//! - The sampling loop only *tries* to take it. When a foreground command holds
//!   it, the iteration is skipped and counted, never queued and never an error.
//! - Foreground operations (`initialize`, `submit_integration_rate`) wait for it.
//! - The loop releases it as soon as the `READ?` exchange returns and sleeps
//!   between iterations without it.
//!
//! # Cancellation
//!
//! `stop()` flips the run flag and returns. The loop notices on its next
//! iteration boundary, so one in-flight sample may still land in the buffer.
//! Callers that need the port right afterwards use `stop_and_wait()`. A new
//! `start()` is refused until the stopped loop has exited, so two loops never
//! sample at once.

use crate::config::AcquisitionConfig;
use crate::data::sample_buffer::{LastSample, SampleBuffer};
use crate::error::{AppResult, DaqError};
use crate::hardware::keithley::{self, IntegrationRate};
use crate::hardware::ports::DeviceHandle;
use crate::hardware::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Pause between sampling iterations unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive access to the transport, held for one exchange (or one setup sequence).
pub type BusyToken<'a> = AsyncMutexGuard<'a, Box<dyn Transport>>;

/// The shared serial line: the transport behind the busy token, plus the
/// device currently bound to it.
pub struct InstrumentLink {
    transport: AsyncMutex<Box<dyn Transport>>,
    device: RwLock<Option<DeviceHandle>>,
}

impl InstrumentLink {
    /// Wrap `transport`; no device is bound yet.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: AsyncMutex::new(Box::new(transport)),
            device: RwLock::new(None),
        }
    }

    /// Take the token if it is free, [`DaqError::Busy`] otherwise.
    pub fn try_acquire(&self) -> AppResult<BusyToken<'_>> {
        self.transport.try_lock().map_err(|_| DaqError::Busy)
    }

    /// Wait until the token is free and take it.
    pub async fn acquire(&self) -> BusyToken<'_> {
        self.transport.lock().await
    }

    /// Whether someone currently holds the token.
    pub fn is_busy(&self) -> bool {
        self.transport.try_lock().is_err()
    }

    /// The bound device, if any.
    pub async fn device(&self) -> Option<DeviceHandle> {
        self.device.read().await.clone()
    }

    /// Bind `handle` as the active device, replacing any previous one.
    pub async fn bind(&self, handle: DeviceHandle) {
        *self.device.write().await = Some(handle);
    }

    /// Forget the active device.
    pub async fn unbind(&self) -> Option<DeviceHandle> {
        self.device.write().await.take()
    }
}

/// Whether the sampling loop is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No loop running (or the last one has been told to stop)
    Idle,
    /// A loop is sampling
    Running,
}

/// Counters of the current run.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    samples: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples appended to the buffer
    pub samples: u64,
    /// Iterations skipped because the transport was busy
    pub skipped: u64,
    /// Iterations whose exchange or parse failed
    pub failures: u64,
}

impl AcquisitionStats {
    fn reset(&self) {
        self.samples.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples: self.samples.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }
}

struct RunHandle {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Owns the sampling loop and the foreground commands that share its line.
pub struct AcquisitionScheduler {
    link: Arc<InstrumentLink>,
    buffer: Arc<SampleBuffer>,
    stats: Arc<AcquisitionStats>,
    poll_interval: Duration,
    run: Mutex<Option<RunHandle>>,
}

impl AcquisitionScheduler {
    /// Scheduler over `link` with an empty buffer.
    pub fn new(link: Arc<InstrumentLink>) -> Self {
        Self {
            link,
            buffer: Arc::new(SampleBuffer::new()),
            stats: Arc::new(AcquisitionStats::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            run: Mutex::new(None),
        }
    }

    /// Scheduler using the `[acquisition]` configuration section.
    pub fn from_config(link: Arc<InstrumentLink>, config: &AcquisitionConfig) -> Self {
        Self::new(link).with_poll_interval(config.poll_interval())
    }

    /// Set the pause between sampling iterations.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The shared line.
    pub fn link(&self) -> &Arc<InstrumentLink> {
        &self.link
    }

    /// The series the loop appends to.
    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Counters of the current (or last) run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Most recent sample, for a status readout.
    pub async fn last_sample(&self) -> Option<LastSample> {
        self.buffer.last().await
    }

    /// Empty the buffer and reset its time origin.
    pub async fn clear(&self) {
        self.buffer.clear().await;
        debug!("Sample buffer cleared");
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        match self.lock_run().as_ref() {
            Some(run) if run.active.load(Ordering::SeqCst) => RunState::Running,
            _ => RunState::Idle,
        }
    }

    /// Start sampling `device_id` on a background task.
    ///
    /// Must be called from within a tokio runtime. Fails without touching the
    /// transport when no device is given, a loop is already running, or a
    /// stopped loop has not exited yet.
    pub fn start(&self, device_id: &str) -> AppResult<()> {
        let device = validate_device(device_id)?.to_string();

        let mut run = self.lock_run();
        if let Some(previous) = run.as_ref() {
            if previous.active.load(Ordering::SeqCst) {
                return Err(DaqError::Validation("Acquisition is already running.".into()));
            }
            if !previous.task.is_finished() {
                return Err(DaqError::Validation(
                    "Acquisition is still stopping. Try again once it has finished.".into(),
                ));
            }
        }

        self.stats.reset();
        let active = Arc::new(AtomicBool::new(true));
        let span = info_span!("acquisition", device = %device);
        let task = tokio::spawn(
            sampling_loop(
                Arc::clone(&self.link),
                Arc::clone(&self.buffer),
                Arc::clone(&self.stats),
                device.clone(),
                Arc::clone(&active),
                self.poll_interval,
            )
            .instrument(span),
        );

        info!(device = %device, interval = ?self.poll_interval, "Acquisition started");
        *run = Some(RunHandle { active, task });
        Ok(())
    }

    /// Ask the loop to stop and return immediately.
    pub fn stop(&self) {
        if let Some(run) = self.lock_run().as_ref() {
            if run.active.swap(false, Ordering::SeqCst) {
                info!("Acquisition stop requested");
            }
        }
    }

    /// Stop and wait until the loop task has exited.
    ///
    /// After this returns the loop will not touch the transport again.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let task = self.lock_run().take().map(|run| run.task);
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Acquisition task ended abnormally");
            }
        }
    }

    /// Send the device setup sequence, holding the token for all of it.
    ///
    /// Waits for the token instead of skipping. The first failing step aborts
    /// the rest; steps already sent are not undone.
    pub async fn initialize(
        &self,
        device_id: &str,
        rate: impl Into<IntegrationRate>,
    ) -> AppResult<()> {
        let device = validate_device(device_id)?;
        let rate = rate.into();

        let transport = self.link.acquire().await;
        for (index, command) in keithley::initialization_sequence(rate)
            .into_iter()
            .enumerate()
        {
            let step = index + 1;
            if let Err(e) = transport.send(device, &command).await {
                error!(device, step, command = %command, error = %e, "Initialization aborted");
                return Err(DaqError::InitializationFailed {
                    step,
                    command,
                    source: Box::new(e),
                });
            }
            debug!(device, step, command = %command, "Initialization step sent");
        }
        drop(transport);

        self.link
            .bind(DeviceHandle {
                port: device.to_string(),
                integration_rate: rate,
            })
            .await;
        info!(device, %rate, "Device initialized");
        Ok(())
    }

    /// Send a new integration rate, clamped to a positive value.
    ///
    /// Returns the rate actually sent.
    pub async fn submit_integration_rate(
        &self,
        device_id: &str,
        rate: impl Into<IntegrationRate>,
    ) -> AppResult<IntegrationRate> {
        let device = validate_device(device_id)?;
        let rate = rate.into();

        {
            let transport = self.link.acquire().await;
            transport.send(device, &rate.command()).await?;
        }

        let mut bound = self.link.device.write().await;
        match bound.as_mut() {
            Some(handle) if handle.port == device => handle.integration_rate = rate,
            _ => {
                *bound = Some(DeviceHandle {
                    port: device.to_string(),
                    integration_rate: rate,
                })
            }
        }
        info!(device, %rate, "Integration rate submitted");
        Ok(rate)
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AcquisitionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_device(device_id: &str) -> AppResult<&str> {
    let device = device_id.trim();
    if device.is_empty() {
        return Err(DaqError::Validation("No device selected.".into()));
    }
    Ok(device)
}

async fn sampling_loop(
    link: Arc<InstrumentLink>,
    buffer: Arc<SampleBuffer>,
    stats: Arc<AcquisitionStats>,
    device: String,
    active: Arc<AtomicBool>,
    interval: Duration,
) {
    let read = keithley::format_query(keithley::READ);

    while active.load(Ordering::SeqCst) {
        match link.try_acquire() {
            Ok(transport) => {
                let response = transport.query(&device, &read).await;
                drop(transport);

                let recorded = match response.and_then(|r| keithley::parse_response(&r)) {
                    Ok(value) => buffer.record(value, Instant::now()).await,
                    Err(e) => Err(e),
                };
                match recorded {
                    Ok(sample) => {
                        stats.samples.fetch_add(1, Ordering::SeqCst);
                        trace!(t = sample.relative_time, value = sample.value, "Sample");
                    }
                    Err(e) if e.is_sample_failure() => {
                        stats.failures.fetch_add(1, Ordering::SeqCst);
                        warn!(device = %device, error = %e, "Sample failed, continuing");
                    }
                    Err(e) => {
                        stats.failures.fetch_add(1, Ordering::SeqCst);
                        error!(device = %device, error = %e, "Sample rejected, continuing");
                    }
                }
            }
            Err(_) => {
                stats.skipped.fetch_add(1, Ordering::SeqCst);
                trace!(device = %device, "Transport busy, skipping sample");
            }
        }

        tokio::time::sleep(interval).await;
    }

    info!(device = %device, "Acquisition loop exited");
}
