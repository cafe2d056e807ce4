use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{MessageBusMetrics, NoopMetrics};

/// Bus configuration.
#[derive(Clone, Debug)]
pub struct BusOptions {
    /// Upper bound between checks of a pending request stream.
    pub poll_interval: Duration,

    /// Timeout applied to requests that set none.
    pub default_request_timeout: Option<Duration>,

    /// Number of recently observed routes kept for `info`.
    pub max_routes: usize,

    /// Cancellation settings.
    pub cancel: CancelOptions,

    /// Ping and info settings.
    pub diagnostics: DiagnosticsOptions,

    /// Metrics sink.
    pub metrics: Arc<dyn MessageBusMetrics>,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            default_request_timeout: None,
            max_routes: 1000,
            cancel: CancelOptions::default(),
            diagnostics: DiagnosticsOptions::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }
}

/// Cancellation settings.
#[derive(Clone, Debug)]
pub struct CancelOptions {
    /// Budget base when a cancel request carries no timeout.
    pub default_timeout: Duration,

    /// How often completion is checked while waiting.
    pub poll_interval: Duration,

    /// Cascades stop past this depth.
    pub max_depth: u32,

    /// Responses collected per cascade.
    pub cascade_limit: usize,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            max_depth: 8,
            cascade_limit: 1000,
        }
    }
}

/// Ping and info settings.
#[derive(Clone, Debug)]
pub struct DiagnosticsOptions {
    /// How long `ping` collects pongs.
    pub ping_timeout: Duration,

    /// How long `info` collects responses.
    pub info_timeout: Duration,

    /// Maximum responses collected.
    pub limit: usize,
}

impl Default for DiagnosticsOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(5),
            info_timeout: Duration::from_secs(3),
            limit: 1000,
        }
    }
}
