//! End-to-end data flow: select a port, initialize, sample, export.

use keithley_daq::acquisition::{AcquisitionScheduler, InstrumentLink};
use keithley_daq::config::AppConfig;
use keithley_daq::data::{export_samples, ExportRequest};
use keithley_daq::hardware::ports::{PortInfo, PortRegistry, StaticPorts};
use keithley_daq::hardware::MockTransport;
use keithley_daq::DaqError;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> PortRegistry {
    PortRegistry::new(StaticPorts(vec![
        PortInfo::new("/dev/ttyUSB0", "Keithley 6485"),
        PortInfo::new("/dev/ttyS0", ""),
    ]))
}

#[tokio::test]
async fn test_select_initialize_acquire_export() {
    let mut registry = registry();
    let mock = Arc::new(
        MockTransport::new()
            .with_devices(registry.identifiers())
            .with_base_current(5.0e-10),
    );
    let config = AppConfig::default();
    let scheduler = AcquisitionScheduler::from_config(
        Arc::new(InstrumentLink::new(Arc::clone(&mock))),
        &config.acquisition,
    );

    let handle = registry.select("/dev/ttyUSB0 - Keithley 6485").unwrap();
    scheduler.initialize(&handle.port, "2").await.unwrap();
    assert_eq!(
        scheduler.link().device().await.unwrap().integration_rate.value(),
        2.0
    );

    scheduler.start(&handle.port).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while scheduler.buffer().len().await < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    scheduler.stop_and_wait().await;

    assert!(mock
        .exchanges()
        .iter()
        .all(|(device, _)| device == "/dev/ttyUSB0"));

    let dir = tempfile::tempdir().unwrap();
    let request = ExportRequest {
        sample_name: "Diode".into(),
        sample_info: "Reverse bias 1 V".into(),
        export_name: "diode_leakage".into(),
        directory: dir.path().to_path_buf(),
        device_info: registry.description(&handle.port),
    };
    let samples = scheduler.buffer().snapshot().await;
    let path = export_samples(&request, &samples).unwrap();

    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.contains("Device information: /dev/ttyUSB0 - Keithley 6485"));
    let rows: Vec<&str> = contents.lines().skip(5).collect();
    assert_eq!(rows.len(), samples.len());
    let first: Vec<f64> = rows[0].split('\t').map(|f| f.parse().unwrap()).collect();
    assert_eq!(first, vec![0.0, 5.0e-10]);
}

#[tokio::test]
async fn test_unknown_device_is_rejected_before_io() {
    let mut registry = registry();
    let mock = Arc::new(MockTransport::new());
    let scheduler = AcquisitionScheduler::new(Arc::new(InstrumentLink::new(Arc::clone(&mock))));

    let err = registry.select("COM42").unwrap_err();
    assert!(matches!(err, DaqError::Validation(_)));
    let err = registry.select("").unwrap_err();
    assert_eq!(err.to_string(), "No device selected.");

    let port = registry.selected().map(|h| h.port.clone()).unwrap_or_default();
    assert!(scheduler.start(&port).is_err());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_export_requires_data() {
    let scheduler = AcquisitionScheduler::new(Arc::new(InstrumentLink::new(MockTransport::new())));
    let dir = tempfile::tempdir().unwrap();
    let request = ExportRequest {
        sample_name: "Empty".into(),
        sample_info: "nothing measured".into(),
        export_name: "empty".into(),
        directory: dir.path().to_path_buf(),
        device_info: String::new(),
    };

    let samples = scheduler.buffer().snapshot().await;
    assert!(matches!(
        export_samples(&request, &samples),
        Err(DaqError::Validation(_))
    ));
}
