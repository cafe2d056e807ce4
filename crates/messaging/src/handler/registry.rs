use std::collections::HashMap;
use std::sync::Arc;

use super::{HandlerInfo, HandlerKind, MessageHandler};
use crate::error::Error;

/// Handlers by body type.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for each of its types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequestHandler`] if the handler answers
    /// requests and another request handler already claims one of its
    /// types. Nothing is registered in that case.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> Result<(), Error> {
        let message_types = handler.message_types();

        if handler.kind() == HandlerKind::Request {
            for message_type in &message_types {
                if let Some(existing) = self.by_type.get(message_type).and_then(|handlers| {
                    handlers
                        .iter()
                        .find(|existing| existing.kind() == HandlerKind::Request)
                }) {
                    return Err(Error::DuplicateRequestHandler {
                        message_type: message_type.clone(),
                        existing: existing.name().to_string(),
                    });
                }
            }
        }

        for message_type in message_types {
            self.by_type
                .entry(message_type)
                .or_default()
                .push(handler.clone());
        }
        self.handlers.push(handler);

        Ok(())
    }

    /// Removes every handler registered under `name`.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|handler| handler.name() != name);

        self.by_type.retain(|_, handlers| {
            handlers.retain(|handler| handler.name() != name);
            !handlers.is_empty()
        });

        before != self.handlers.len()
    }

    /// Handlers for a body type, in registration order.
    #[must_use]
    pub fn find(&self, message_type: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.by_type.get(message_type).cloned().unwrap_or_default()
    }

    /// Descriptions of all handlers, in registration order.
    #[must_use]
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.handlers.iter().map(|handler| handler.info()).collect()
    }

    /// Number of handled types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerContext, HandlerError};
    use async_trait::async_trait;

    struct Named {
        name: &'static str,
        kind: HandlerKind,
    }

    #[async_trait]
    impl MessageHandler for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn message_types(&self) -> Vec<String> {
            vec!["vehicle-moved".to_string()]
        }

        fn kind(&self) -> HandlerKind {
            self.kind
        }

        async fn process(&self, _context: HandlerContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn handler(name: &'static str, kind: HandlerKind) -> Arc<dyn MessageHandler> {
        Arc::new(Named { name, kind })
    }

    #[test]
    fn test_event_handlers_fan_out() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("audit", HandlerKind::Event)).unwrap();
        registry.register(handler("map", HandlerKind::Event)).unwrap();

        let names: Vec<String> = registry
            .find("vehicle-moved")
            .iter()
            .map(|handler| handler.name().to_string())
            .collect();
        assert_eq!(names, ["audit", "map"]);
    }

    #[test]
    fn test_duplicate_request_handler_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("first", HandlerKind::Request)).unwrap();

        let err = registry
            .register(handler("second", HandlerKind::Request))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateRequestHandler { ref existing, .. } if existing == "first"
        ));
        assert_eq!(registry.find("vehicle-moved").len(), 1);

        // Event handlers may still observe the type.
        registry.register(handler("audit", HandlerKind::Event)).unwrap();
        assert_eq!(registry.find("vehicle-moved").len(), 2);
    }

    #[test]
    fn test_unregister() {
        let mut registry = HandlerRegistry::new();
        registry.register(handler("audit", HandlerKind::Event)).unwrap();

        assert!(registry.unregister("audit"));
        assert!(!registry.unregister("audit"));
        assert!(registry.is_empty());
        assert!(registry.handlers().is_empty());
    }
}
