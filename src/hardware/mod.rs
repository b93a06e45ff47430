//! Hardware Layer
//!
//! Serial transport, the instrument command protocol, port discovery, and a mock
//! transport for running without an instrument attached.

pub mod keithley;
pub mod mock;
pub mod ports;
pub mod transport;

pub use keithley::IntegrationRate;
pub use mock::MockTransport;
pub use ports::{DeviceHandle, PortInfo, PortRegistry};
pub use transport::{Reply, SerialTransport, SerialTransportBuilder, Transport};
