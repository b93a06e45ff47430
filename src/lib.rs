//! # Keithley DAQ Core Library
//!
//! Drives a Keithley picoammeter over a serial link, samples the current
//! continuously and hands the resulting time series to whatever presents or
//! stores it. The library is shared by the `keithley_daq` command-line binary
//! and by any front end that wants to embed acquisition.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: The half-duplex serial [`Transport`](hardware::Transport), the
//!   instrument command protocol (`hardware::keithley`), serial port discovery and
//!   device selection, and a mock transport for running without an instrument.
//! - **`acquisition`**: The [`AcquisitionScheduler`](acquisition::AcquisitionScheduler)
//!   that runs the background sampling loop and arbitrates the serial line between
//!   that loop and foreground commands.
//! - **`data`**: The append-only [`SampleBuffer`](data::SampleBuffer) and the `.dat`
//!   export of a finished series.
//! - **`config`**: Layered configuration (defaults, TOML file, environment).
//! - **`error`**: The crate-wide `DaqError` enum.
//! - **`logging`**: `tracing-subscriber` initialisation.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;

pub use acquisition::{AcquisitionScheduler, InstrumentLink, RunState};
pub use error::{AppResult, DaqError};
