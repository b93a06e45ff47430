//! Append-only time series produced by the acquisition loop.
//!
//! Relative time is measured from the first sample recorded after the buffer
//! was created or last cleared. Every operation takes the lock once, so a
//! snapshot never sees a half-written sample.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local};
use std::time::Instant;
use tokio::sync::RwLock;

/// One measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since the first sample of the run
    pub relative_time: f64,
    /// Measured value, in amperes
    pub value: f64,
}

impl Sample {
    /// Sample at `relative_time` seconds.
    pub fn new(relative_time: f64, value: f64) -> Self {
        Self {
            relative_time,
            value,
        }
    }
}

/// Most recent sample plus the wall-clock time it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct LastSample {
    /// The sample itself
    pub sample: Sample,
    /// When it was appended
    pub acquired_at: DateTime<Local>,
}

impl LastSample {
    /// Status readout, e.g. `1.2346e-9 A (2024-05-01 12:00:00)`.
    pub fn status_line(&self) -> String {
        format!(
            "{:.4e} A ({})",
            self.sample.value,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[derive(Debug, Default)]
struct Series {
    samples: Vec<Sample>,
    origin: Option<Instant>,
    last: Option<LastSample>,
}

impl Series {
    fn push(&mut self, sample: Sample) -> AppResult<()> {
        if !sample.relative_time.is_finite() || sample.relative_time < 0.0 {
            return Err(DaqError::Validation(format!(
                "Sample time {} is not a non-negative number",
                sample.relative_time
            )));
        }
        if let Some(previous) = self.samples.last() {
            if sample.relative_time <= previous.relative_time {
                return Err(DaqError::Validation(format!(
                    "Sample at {}s is not after the previous sample at {}s",
                    sample.relative_time, previous.relative_time
                )));
            }
        }

        self.samples.push(sample);
        self.last = Some(LastSample {
            sample,
            acquired_at: Local::now(),
        });
        Ok(())
    }
}

/// Time-ordered store of [`Sample`]s.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    series: RwLock<Series>,
}

impl SampleBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample taken at `at`, timed against the first recorded sample.
    pub async fn record(&self, value: f64, at: Instant) -> AppResult<Sample> {
        let mut series = self.series.write().await;
        let origin = *series.origin.get_or_insert(at);
        let sample = Sample::new(at.saturating_duration_since(origin).as_secs_f64(), value);
        series.push(sample)?;
        Ok(sample)
    }

    /// Append a pre-timed sample; it must be strictly later than the last one.
    pub async fn append(&self, sample: Sample) -> AppResult<()> {
        self.series.write().await.push(sample)
    }

    /// Drop every sample and reset the time origin.
    pub async fn clear(&self) {
        *self.series.write().await = Series::default();
    }

    /// Copy of all samples in insertion order.
    pub async fn snapshot(&self) -> Vec<Sample> {
        self.series.read().await.samples.clone()
    }

    /// Number of samples held.
    pub async fn len(&self) -> usize {
        self.series.read().await.samples.len()
    }

    /// Whether the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.series.read().await.samples.is_empty()
    }

    /// The most recent sample, if any.
    pub async fn last(&self) -> Option<LastSample> {
        self.series.read().await.last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_times_relative_to_first_sample() {
        let buffer = SampleBuffer::new();
        let t0 = Instant::now();

        let first = buffer.record(1.0e-9, t0).await.unwrap();
        let second = buffer
            .record(2.0e-9, t0 + Duration::from_millis(250))
            .await
            .unwrap();

        assert_eq!(first.relative_time, 0.0);
        assert!((second.relative_time - 0.25).abs() < 1e-9);
        assert_eq!(buffer.snapshot().await, vec![first, second]);
        assert_eq!(buffer.last().await.unwrap().sample, second);
    }

    #[tokio::test]
    async fn test_clear_resets_origin() {
        let buffer = SampleBuffer::new();
        let t0 = Instant::now();
        buffer.record(1.0, t0).await.unwrap();
        buffer.record(2.0, t0 + Duration::from_secs(1)).await.unwrap();

        buffer.clear().await;
        assert!(buffer.is_empty().await);
        assert!(buffer.last().await.is_none());

        let restarted = buffer
            .record(3.0, t0 + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(restarted.relative_time, 0.0);
    }

    #[tokio::test]
    async fn test_append_rejects_out_of_order() {
        let buffer = SampleBuffer::new();
        buffer.append(Sample::new(0.0, 1.0)).await.unwrap();
        buffer.append(Sample::new(0.5, 1.0)).await.unwrap();

        assert!(buffer.append(Sample::new(0.5, 2.0)).await.is_err());
        assert!(buffer.append(Sample::new(0.1, 2.0)).await.is_err());
        assert!(buffer.append(Sample::new(-1.0, 2.0)).await.is_err());
        assert!(buffer.append(Sample::new(f64::NAN, 2.0)).await.is_err());
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_len_matches_appends_since_clear() {
        let buffer = SampleBuffer::new();
        let t0 = Instant::now();

        for round in 0..3u64 {
            buffer.clear().await;
            let count = 5 + round as usize * 3;
            for i in 0..count {
                buffer
                    .record(i as f64, t0 + Duration::from_millis(10 * i as u64 + round))
                    .await
                    .unwrap();
            }
            let snapshot = buffer.snapshot().await;
            assert_eq!(snapshot.len(), count);
            assert!(snapshot
                .windows(2)
                .all(|w| w[0].relative_time < w[1].relative_time));
        }
    }

    #[test]
    fn test_status_line() {
        let last = LastSample {
            sample: Sample::new(0.0, 1.23456e-9),
            acquired_at: Local::now(),
        };
        let line = last.status_line();
        assert!(line.starts_with("1.2346e-9 A ("), "{}", line);
    }
}
