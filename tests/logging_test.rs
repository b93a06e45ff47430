//! Global subscriber installation. Lives in its own test binary so nothing
//! else has claimed the global dispatcher first.

use keithley_daq::config::AppConfig;
use keithley_daq::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let mut config = AppConfig::default();
    config.application.log_format = "compact".into();
    assert!(logging::init_from_config(&config).is_ok());
    assert!(tracing::dispatcher::has_been_set());

    let again = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Json);
    assert!(logging::init(again).is_ok());
}

#[test]
fn test_invalid_level_is_rejected_before_install() {
    let mut config = AppConfig::default();
    config.application.log_level = "loud".into();
    assert!(logging::init_from_config(&config).is_err());
}
