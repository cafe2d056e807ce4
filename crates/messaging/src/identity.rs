use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime tag stamped on identities created by this crate.
pub const RUNTIME: &str = "rust";

/// Who a bus instance is.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ServiceIdentity {
    /// Service name. Instances of one service share queue subscriptions.
    pub name: String,

    /// Instance number within the service.
    pub instance: u32,

    /// Runtime the instance runs on.
    pub runtime: String,
}

impl ServiceIdentity {
    /// An identity for this runtime.
    #[must_use]
    pub fn new(name: impl Into<String>, instance: u32) -> Self {
        Self {
            name: name.into(),
            instance,
            runtime: RUNTIME.to_string(),
        }
    }

    /// Key unique per service instance.
    #[must_use]
    pub fn instance_key(&self) -> String {
        format!("{}/{}", self.name, self.instance)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.instance, self.runtime)
    }
}
