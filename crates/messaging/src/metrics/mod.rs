//! Traffic metrics.
//!
//! The bus reports every publish and every dispatch to a
//! [`MessageBusMetrics`] sink. Recording never affects control flow.

#[cfg(feature = "metrics")]
mod prometheus;

#[cfg(feature = "metrics")]
pub use self::prometheus::PrometheusMetrics;

use std::fmt::Debug;
use std::time::Duration;

/// Literal leading every private inbox subject.
pub const INBOX_PREFIX: &str = "inbox";

/// Outcome of processing one message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProcessStatus {
    /// All handlers succeeded.
    Success,

    /// A handler failed.
    Error,

    /// No handler was registered for the type.
    Ignored,
}

impl ProcessStatus {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Ignored => "ignored",
        }
    }
}

/// Sink for traffic metrics.
pub trait MessageBusMetrics: Debug + Send + Sync + 'static {
    /// A message was published.
    fn published(&self, subject: &str, message_type: &str);

    /// A message was processed by one handler, or ignored.
    fn processed(
        &self,
        subject: &str,
        message_type: &str,
        status: ProcessStatus,
        elapsed: Option<Duration>,
    );
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MessageBusMetrics for NoopMetrics {
    fn published(&self, _subject: &str, _message_type: &str) {}

    fn processed(
        &self,
        _subject: &str,
        _message_type: &str,
        _status: ProcessStatus,
        _elapsed: Option<Duration>,
    ) {
    }
}

/// Collapses per instance inbox subjects so they do not explode label
/// cardinality: the last token of an `inbox` subject is dropped.
#[must_use]
pub fn normalize_subject(subject: &str, separator: &str) -> String {
    let is_inbox = subject
        .strip_prefix(INBOX_PREFIX)
        .is_some_and(|rest| rest.starts_with(separator));

    match subject.rsplit_once(separator) {
        Some((head, _)) if is_inbox => head.to_string(),
        _ => subject.to_string(),
    }
}
