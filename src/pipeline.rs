//! # Ingestion Pipeline
//!
//! Per-frame path: parse, log, publish.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::broadcast::TelemetryHub;
use crate::error::Result;
use crate::telemetry::logger::TelemetryLogger;
use crate::telemetry::parser::TelemetryParser;

/// Parser, flight log and hub wired together
pub struct Pipeline {
    parser: TelemetryParser,
    logger: Option<Arc<Mutex<TelemetryLogger>>>,
    hub: Arc<TelemetryHub>,
}

impl Pipeline {
    pub fn new(
        parser: TelemetryParser,
        logger: Option<Arc<Mutex<TelemetryLogger>>>,
        hub: Arc<TelemetryHub>,
    ) -> Self {
        Self { parser, logger, hub }
    }

    pub fn hub(&self) -> &Arc<TelemetryHub> {
        &self.hub
    }

    /// Handle one frame.
    ///
    /// Rejected frames are dropped quietly. Live records are logged before
    /// they are published.
    ///
    /// # Errors
    ///
    /// Returns error only if the flight log write fails
    pub async fn handle_line(&mut self, line: &str) -> Result<()> {
        let record = match self.parser.parse(line) {
            Ok(record) => record,
            Err(rejection) => {
                debug!("Frame rejected: {}", rejection);
                return Ok(());
            }
        };

        if record.is_loggable() {
            if let Some(logger) = &self.logger {
                logger.lock().await.write_record(&record)?;
            }
        }

        self.hub.publish(&record).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::mocks::MockSubscriber;
    use crate::telemetry::logger::LogFormat;
    use crate::telemetry::schema::Channel;
    use std::time::Duration;
    use tempfile::TempDir;

    const FRAME: &str =
        "5.2,-3.1,45.8,125.5,15.3,0.5,0.2,9.8,101325.0,22.5,1,8,37.123456,-122.345678,130.2,12.5,3.85,-95";

    fn setup(dir: &TempDir) -> (Pipeline, Arc<Mutex<TelemetryLogger>>, Arc<TelemetryHub>) {
        let hub = Arc::new(TelemetryHub::new(Duration::from_millis(100)));
        let format = LogFormat {
            flush_interval: 1,
            ..LogFormat::default()
        };
        let logger = Arc::new(Mutex::new(
            TelemetryLogger::open(dir.path().join("run.csv"), format).unwrap(),
        ));
        let pipeline = Pipeline::new(TelemetryParser::new(), Some(logger.clone()), hub.clone());
        (pipeline, logger, hub)
    }

    #[tokio::test]
    async fn test_live_frame_logged_and_published() {
        let dir = TempDir::new().unwrap();
        let (mut pipeline, logger, hub) = setup(&dir);
        let sub = MockSubscriber::new();
        hub.register(sub.clone()).await;

        pipeline.handle_line(FRAME).await.unwrap();

        assert_eq!(logger.lock().await.write_count(), 1);
        assert_eq!(hub.snapshot().data.get(Channel::GpsLat), "37.123456");
        assert_eq!(sub.count(), 2);
    }

    #[tokio::test]
    async fn test_waiting_frame_published_not_logged() {
        let dir = TempDir::new().unwrap();
        let (mut pipeline, logger, hub) = setup(&dir);

        pipeline.handle_line("Waiting for GPS Fix,-101").await.unwrap();

        assert_eq!(logger.lock().await.write_count(), 0);
        assert_eq!(hub.snapshot().data.get(Channel::Rssi), "-101.0");
    }

    #[tokio::test]
    async fn test_rejected_frame_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut pipeline, logger, hub) = setup(&dir);
        let sub = MockSubscriber::new();
        hub.register(sub.clone()).await;

        pipeline.handle_line("1,2,3").await.unwrap();
        pipeline.handle_line("").await.unwrap();

        assert_eq!(logger.lock().await.write_count(), 0);
        assert_eq!(sub.count(), 1);
    }

    #[tokio::test]
    async fn test_log_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let (mut pipeline, logger, _hub) = setup(&dir);
        logger.lock().await.close().unwrap();

        assert!(pipeline.handle_line(FRAME).await.is_err());
    }

    #[tokio::test]
    async fn test_without_logger() {
        let hub = Arc::new(TelemetryHub::new(Duration::from_millis(100)));
        let mut pipeline = Pipeline::new(TelemetryParser::new(), None, hub.clone());
        pipeline.handle_line(FRAME).await.unwrap();
        assert_eq!(hub.snapshot().data.get(Channel::Pitch), "5.2");
    }
}
