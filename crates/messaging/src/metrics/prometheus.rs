use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use super::{MessageBusMetrics, ProcessStatus};

/// Prometheus backed metrics.
#[derive(Clone, Debug)]
pub struct PrometheusMetrics {
    sent: IntCounterVec,
    received: IntCounterVec,
    received_duration: HistogramVec,
}

impl PrometheusMetrics {
    /// Creates the collectors and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector with the same name is already
    /// registered.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let sent = IntCounterVec::new(
            Opts::new("fleet_messages_sent_total", "Messages published"),
            &["subject", "message_type"],
        )?;
        registry.register(Box::new(sent.clone()))?;

        let received = IntCounterVec::new(
            Opts::new("fleet_messages_received_total", "Messages processed"),
            &["subject", "message_type", "status"],
        )?;
        registry.register(Box::new(received.clone()))?;

        let received_duration = HistogramVec::new(
            HistogramOpts::new(
                "fleet_message_received_duration_ms",
                "Handler processing time in milliseconds",
            )
            .buckets(vec![
                1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0,
            ]),
            &["subject", "message_type", "status"],
        )?;
        registry.register(Box::new(received_duration.clone()))?;

        Ok(Self {
            sent,
            received,
            received_duration,
        })
    }
}

impl MessageBusMetrics for PrometheusMetrics {
    fn published(&self, subject: &str, message_type: &str) {
        self.sent.with_label_values(&[subject, message_type]).inc();
    }

    fn processed(
        &self,
        subject: &str,
        message_type: &str,
        status: ProcessStatus,
        elapsed: Option<Duration>,
    ) {
        let labels = [subject, message_type, status.as_str()];
        self.received.with_label_values(&labels).inc();

        if let Some(elapsed) = elapsed {
            self.received_duration
                .with_label_values(&labels)
                .observe(elapsed.as_secs_f64() * 1000.0);
        }
    }
}
