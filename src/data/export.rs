//! `.dat` export of an acquired series.
//!
//! Layout:
//!
//! ```text
//! Sample name: <name>
//! Sample information: <info>
//! Device information: <device>
//!
//! Relative time (s)	Current (A)
//! 0	1.0e-9
//! 0.011	1.01e-9
//! ```

use crate::data::sample_buffer::Sample;
use crate::error::{AppResult, DaqError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// File extension of exported series.
pub const EXPORT_EXTENSION: &str = "dat";

/// Column header line.
pub const COLUMN_HEADER: &str = "Relative time (s)\tCurrent (A)";

/// Everything the user supplies for an export.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Free-text sample name
    pub sample_name: String,
    /// Free-text sample description
    pub sample_info: String,
    /// File name without extension
    pub export_name: String,
    /// Target directory
    pub directory: PathBuf,
    /// Instrument / port description written into the header
    pub device_info: String,
}

impl ExportRequest {
    /// Names of the required fields left empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.sample_name.trim().is_empty() {
            missing.push("Sample name");
        }
        if self.sample_info.trim().is_empty() {
            missing.push("Sample information");
        }
        if self.export_name.trim().is_empty() {
            missing.push("Export name");
        }
        if self.directory.as_os_str().is_empty() {
            missing.push("Export directory");
        }
        missing
    }

    /// Full path of the file this request writes.
    pub fn path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.export_name.trim(), EXPORT_EXTENSION))
    }

    /// Check preconditions against the data to be written.
    pub fn validate(&self, samples: &[Sample]) -> AppResult<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(DaqError::Validation(format!(
                "Please fill in the following fields:\n\t{}",
                missing.join("\n\t")
            )));
        }
        if samples.is_empty() {
            return Err(DaqError::Validation(
                "No data to export. Please start the acquisition first.".into(),
            ));
        }
        Ok(())
    }
}

/// Write `samples` to the file described by `request`, returning its path.
///
/// The target directory is created if needed.
pub fn export_samples(request: &ExportRequest, samples: &[Sample]) -> AppResult<PathBuf> {
    request.validate(samples)?;

    if !request.directory.exists() {
        std::fs::create_dir_all(&request.directory)?;
    }

    let path = request.path();
    write_dat(&path, request, samples)?;
    info!(path = %path.display(), samples = samples.len(), "Exported series");
    Ok(path)
}

#[cfg(feature = "storage_csv")]
fn write_dat(path: &Path, request: &ExportRequest, samples: &[Sample]) -> AppResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_header(&mut file, request)?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file);
    for sample in samples {
        writer
            .write_record(&[sample.relative_time.to_string(), sample.value.to_string()])
            .map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn write_dat(path: &Path, request: &ExportRequest, samples: &[Sample]) -> AppResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_header(&mut file, request)?;
    for sample in samples {
        writeln!(file, "{}\t{}", sample.relative_time, sample.value)?;
    }
    file.flush()?;
    Ok(())
}

fn write_header<W: Write>(out: &mut W, request: &ExportRequest) -> std::io::Result<()> {
    writeln!(out, "Sample name: {}", request.sample_name)?;
    writeln!(out, "Sample information: {}", request.sample_info)?;
    writeln!(out, "Device information: {}", request.device_info)?;
    writeln!(out)?;
    writeln!(out, "{}", COLUMN_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> ExportRequest {
        ExportRequest {
            sample_name: "Graphene FET".into(),
            sample_info: "Vg = 0 V, dark".into(),
            export_name: "run01".into(),
            directory: dir.to_path_buf(),
            device_info: "/dev/ttyUSB0 - USB-Serial Controller".into(),
        }
    }

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![Sample::new(0.0, 1.0e-9), Sample::new(0.5, 2.5e-9)];

        let path = export_samples(&request(dir.path()), &samples).unwrap();
        assert_eq!(path, dir.path().join("run01.dat"));

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Sample name: Graphene FET");
        assert_eq!(lines[1], "Sample information: Vg = 0 V, dark");
        assert_eq!(lines[2], "Device information: /dev/ttyUSB0 - USB-Serial Controller");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], COLUMN_HEADER);
        assert_eq!(lines[5], "0\t0.000000001");
        assert_eq!(lines[6], "0.5\t0.0000000025");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = export_samples(&request(&nested), &[Sample::new(0.0, 1.0)]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_lists_missing_fields() {
        let err = ExportRequest::default()
            .validate(&[Sample::new(0.0, 1.0)])
            .unwrap_err();
        let msg = err.to_string();
        for field in ["Sample name", "Sample information", "Export name", "Export directory"] {
            assert!(msg.contains(field), "missing {} in {}", field, msg);
        }
    }

    #[test]
    fn test_refuses_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_samples(&request(dir.path()), &[]).unwrap_err();
        assert!(err.to_string().starts_with("No data to export"));
        assert!(!dir.path().join("run01.dat").exists());
    }
}
