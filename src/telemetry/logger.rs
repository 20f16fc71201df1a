//! # Flight Data Logger
//!
//! Append-only CSV log of accepted telemetry, one file per run.
//!
//! The first row written fixes the column set (and writes the header when
//! enabled). Later rows are expected to carry the same columns in the same
//! order; they are not re-checked. Rows are buffered and flushed every
//! `flush_interval` writes.

use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::record::{LogValue, TelemetryRecord};
use super::schema::{precision_for, round_to};
use crate::config::TelemetryConfig;
use crate::error::{GroundlinkError, Result};

/// CSV formatting options
#[derive(Debug, Clone)]
pub struct LogFormat {
    pub include_header: bool,
    pub delimiter: char,
    pub flush_interval: usize,
    pub float_precision: u32,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            include_header: true,
            delimiter: ',',
            flush_interval: 10,
            float_precision: 6,
        }
    }
}

impl From<&TelemetryConfig> for LogFormat {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            include_header: config.include_header,
            delimiter: config.delimiter,
            flush_interval: config.flush_interval,
            float_precision: config.float_precision,
        }
    }
}

/// CSV writer for one run's telemetry
pub struct TelemetryLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    columns: Option<Vec<String>>,
    format: LogFormat,
    write_count: u64,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger")
            .field("path", &self.path)
            .field("write_count", &self.write_count)
            .field("open", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    /// Open this run's log file under `config.log_dir`.
    ///
    /// The file name is `<file_prefix>_<run start>.csv`, with the run start
    /// rendered through `config.filename_format`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory is missing (and auto-create is off)
    /// or the file cannot be created
    pub fn create(config: &TelemetryConfig) -> Result<Self> {
        let dir = Path::new(&config.log_dir);
        if config.auto_create_directory {
            fs::create_dir_all(dir)?;
        }
        let stamp = Local::now().format(&config.filename_format).to_string();
        let path = dir.join(format!("{}_{}.csv", config.file_prefix, stamp));
        Self::open(path, LogFormat::from(config))
    }

    /// Open (truncating) a log file at an explicit path
    pub fn open<P: Into<PathBuf>>(path: P, format: LogFormat) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        info!("Logging to CSV: {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            columns: None,
            format,
            write_count: 0,
        })
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one record
    pub fn write_record(&mut self, record: &TelemetryRecord) -> Result<()> {
        self.write_row(&record.to_row())
    }

    /// Append one named row.
    ///
    /// # Errors
    ///
    /// Returns error if the logger has been closed or the write fails
    pub fn write_row(&mut self, row: &[(&str, LogValue)]) -> Result<()> {
        let delimiter = self.format.delimiter;
        let float_precision = self.format.float_precision;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| GroundlinkError::Logger("log file already closed".to_string()))?;

        if self.columns.is_none() {
            let columns: Vec<String> = row.iter().map(|(name, _)| name.to_string()).collect();
            if self.format.include_header {
                let header: Vec<String> = columns.iter().map(|c| escape(c, delimiter)).collect();
                writeln!(writer, "{}", header.join(&delimiter.to_string()))?;
            }
            debug!("Log schema fixed at {} columns", columns.len());
            self.columns = Some(columns);
        }

        let cells: Vec<String> = row
            .iter()
            .map(|(name, value)| format_cell(name, value, float_precision, delimiter))
            .collect();
        writeln!(writer, "{}", cells.join(&delimiter.to_string()))?;

        self.write_count += 1;
        if self.format.flush_interval > 0 && self.write_count % self.format.flush_interval as u64 == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    /// Force buffered rows to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and release the file. Calling again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            info!("Closing log file: {} ({} rows)", self.path.display(), self.write_count);
            writer.flush()?;
        }
        Ok(())
    }
}

fn format_cell(name: &str, value: &LogValue, float_precision: u32, delimiter: char) -> String {
    match value {
        LogValue::Text(text) => escape(text, delimiter),
        LogValue::Int(v) => v.to_string(),
        LogValue::Float(v) => {
            let places = precision_for(name).unwrap_or(float_precision);
            round_to(*v, places).to_string()
        }
    }
}

/// Quote a cell if it contains the delimiter, a quote or a line break
fn escape(text: &str, delimiter: char) -> String {
    if text.contains(delimiter) || text.contains('"') || text.contains('\n') || text.contains('\r') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::parser::TelemetryParser;
    use crate::telemetry::schema::Channel;
    use tempfile::TempDir;

    const REFERENCE: &str =
        "5.2,-3.1,45.8,125.5,15.3,0.5,0.2,9.8,101325.0,22.5,1,8,37.123456,-122.345678,130.2,12.5,3.85,-95";

    fn open_logger(dir: &TempDir, format: LogFormat) -> TelemetryLogger {
        TelemetryLogger::open(dir.path().join("flight.csv"), format).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_header_then_rows() {
        let dir = TempDir::new().unwrap();
        let mut logger = open_logger(&dir, LogFormat::default());
        let mut parser = TelemetryParser::new();

        logger.write_record(&parser.parse(REFERENCE).unwrap()).unwrap();
        logger.write_record(&parser.parse(REFERENCE).unwrap()).unwrap();
        logger.close().unwrap();

        let lines = read_lines(logger.path());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,sequence,sys_status,pitch,roll"));
        assert!(lines[0].ends_with("vbat,rssi"));
        let cells: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(cells.len(), 21);
        assert_eq!(cells[1], "1");
        assert_eq!(cells[2], "active");
        assert_eq!(lines[2].split(',').nth(1), Some("2"));
    }

    #[test]
    fn test_no_header_when_disabled() {
        let dir = TempDir::new().unwrap();
        let format = LogFormat {
            include_header: false,
            ..LogFormat::default()
        };
        let mut logger = open_logger(&dir, format);
        let record = TelemetryParser::new().parse(REFERENCE).unwrap();
        logger.write_record(&record).unwrap();
        logger.close().unwrap();

        let lines = read_lines(logger.path());
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains("timestamp"));
    }

    #[test]
    fn test_logged_values_match_rounding_table() {
        let dir = TempDir::new().unwrap();
        let mut logger = open_logger(&dir, LogFormat::default());
        let mut record = TelemetryParser::new().parse(REFERENCE).unwrap();
        // Simulate float drift after parsing
        record.values.set(Channel::GpsLat, 37.12345649999);
        record.values.set(Channel::Vbat, 3.8500000001);
        record.values.set(Channel::Pitch, 5.20000000049);
        logger.write_record(&record).unwrap();
        logger.close().unwrap();

        let lines = read_lines(logger.path());
        let header: Vec<&str> = lines[0].split(',').collect();
        let row: Vec<&str> = lines[1].split(',').collect();
        let cell = |name: &str| {
            let idx = header.iter().position(|h| *h == name).unwrap();
            row[idx].parse::<f64>().unwrap()
        };

        assert_eq!(cell("gps_lat"), round_to(37.12345649999, 6));
        assert_eq!(cell("gps_lon"), -122.345678);
        assert_eq!(cell("vbat"), 3.85);
        assert_eq!(cell("pitch"), 5.2);
        assert_eq!(cell("gps_sats"), 8.0);
        assert_eq!(cell("rssi"), -95.0);
    }

    #[test]
    fn test_flush_interval() {
        let dir = TempDir::new().unwrap();
        let format = LogFormat {
            flush_interval: 2,
            include_header: false,
            ..LogFormat::default()
        };
        let mut logger = open_logger(&dir, format);
        let mut parser = TelemetryParser::new();

        logger.write_record(&parser.parse(REFERENCE).unwrap()).unwrap();
        assert_eq!(read_lines(logger.path()).len(), 0, "first row still buffered");

        logger.write_record(&parser.parse(REFERENCE).unwrap()).unwrap();
        assert_eq!(read_lines(logger.path()).len(), 2, "second row triggers flush");
    }

    #[test]
    fn test_flush_every_write() {
        let dir = TempDir::new().unwrap();
        let format = LogFormat {
            flush_interval: 1,
            ..LogFormat::default()
        };
        let mut logger = open_logger(&dir, format);
        let record = TelemetryParser::new().parse(REFERENCE).unwrap();
        logger.write_record(&record).unwrap();
        assert_eq!(read_lines(logger.path()).len(), 2);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut logger = open_logger(&dir, LogFormat::default());
        assert!(logger.is_open());
        logger.close().unwrap();
        logger.close().unwrap();
        assert!(!logger.is_open());
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut logger = open_logger(&dir, LogFormat::default());
        logger.close().unwrap();
        let record = TelemetryParser::new().parse(REFERENCE).unwrap();
        match logger.write_record(&record) {
            Err(GroundlinkError::Logger(msg)) => assert!(msg.contains("closed")),
            other => panic!("Expected Logger error, got: {:?}", other),
        }
    }

    #[test]
    fn test_custom_delimiter_and_escaping() {
        let dir = TempDir::new().unwrap();
        let format = LogFormat {
            delimiter: ';',
            ..LogFormat::default()
        };
        let mut logger = open_logger(&dir, format);
        logger
            .write_row(&[
                ("note", LogValue::Text("a;b".to_string())),
                ("value", LogValue::Float(1.5)),
            ])
            .unwrap();
        logger.close().unwrap();

        let lines = read_lines(logger.path());
        assert_eq!(lines[0], "note;value");
        assert_eq!(lines[1], "\"a;b\";1.5");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain", ','), "plain");
        assert_eq!(escape("say \"hi\"", ','), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_create_uses_prefix_and_dir() {
        let dir = TempDir::new().unwrap();
        let config = TelemetryConfig {
            log_dir: dir.path().join("nested").to_string_lossy().into_owned(),
            ..TelemetryConfig::default()
        };
        let mut logger = TelemetryLogger::create(&config).unwrap();
        let name = logger.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&config.file_prefix));
        assert!(name.ends_with(".csv"));
        assert!(logger.path().exists());
        logger.close().unwrap();
    }
}
