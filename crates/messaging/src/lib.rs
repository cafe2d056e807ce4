//! Transport-agnostic messaging middleware.
//!
//! Services address each other with abstract [`path::MessagePath`]s that a
//! [`driver::MessageBusDriver`] renders into transport subjects. On top of
//! plain publish/subscribe the [`MessageBus`] provides request/response
//! correlation over a private inbox, fan-out event dispatch, diagnostics
//! and cooperative, cascading cancellation of in-flight requests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod active;
mod bus;
mod dispatcher;
mod error;
mod options;

/// Cooperative cancellation of in-flight requests.
pub mod cancel;

/// Payload codecs.
pub mod codec;

/// Ping and info.
pub mod diagnostics;

/// The transport seam.
pub mod driver;

/// Wire message model.
pub mod envelope;

/// Message handlers.
pub mod handler;

/// Service identities.
pub mod identity;

/// Response correlation.
pub mod matcher;

/// Traffic metrics.
pub mod metrics;

/// Abstract message paths.
pub mod path;

/// Built-in paths.
pub mod paths;

/// Request options.
pub mod request;

/// Observed message routes.
pub mod routes;

/// Subscriptions.
pub mod subscription;

/// Sequence tracking.
pub mod tracking;

pub use active::{ActiveHandlers, ActiveRequest};
pub use bus::{MessageBus, ResponseStream};
pub use error::{Error, RequestTimeoutError};
pub use options::{BusOptions, CancelOptions, DiagnosticsOptions};
