//! Paths every bus listens on.

use crate::path::{Error, MessagePath};

/// Per instance inbox responses are delivered to.
pub const INBOX: &str = "inbox/{name(required)}/{instanceId(required)}";

/// Control channel every instance listens on.
pub const CONTROL: &str = "messaging/control";

/// Control channel of one service.
pub const SERVICE_CONTROL: &str = "messaging/control/{name(required)}";

/// Parsed [`INBOX`].
///
/// # Errors
///
/// Never fails for the built-in template.
pub fn inbox() -> Result<MessagePath, Error> {
    MessagePath::parse(INBOX)
}

/// Parsed [`CONTROL`].
///
/// # Errors
///
/// Never fails for the built-in template.
pub fn control() -> Result<MessagePath, Error> {
    MessagePath::parse(CONTROL)
}

/// Parsed [`SERVICE_CONTROL`].
///
/// # Errors
///
/// Never fails for the built-in template.
pub fn service_control() -> Result<MessagePath, Error> {
    MessagePath::parse(SERVICE_CONTROL)
}
