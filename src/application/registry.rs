use crate::domain::invoice::Invoice;
use crate::error::BoxError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Business-layer callback invoked when a settled invoice is dispatched.
///
/// Delivery is at-least-once: a crash between a successful invocation and the
/// record delete means the handler runs again on the next recovery pass, so
/// implementations must be idempotent per payment identifier.
#[async_trait]
pub trait SettlementHandler: Send + Sync {
    async fn on_settled(&self, invoice: Invoice, context: String) -> Result<(), BoxError>;
}

/// Lifts an async closure into a [`SettlementHandler`].
pub struct FnHandler<F>(F);

impl<F, Fut> FnHandler<F>
where
    F: Fn(Invoice, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> SettlementHandler for FnHandler<F>
where
    F: Fn(Invoice, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn on_settled(&self, invoice: Invoice, context: String) -> Result<(), BoxError> {
        (self.0)(invoice, context).await
    }
}

/// Immutable snapshot mapping handler ids to callbacks.
///
/// The registry is sealed by [`HandlerRegistryBuilder::build`] before the
/// engine is constructed; nothing can register afterwards, so dispatch reads
/// it without a lock.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn SettlementHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, handler_id: &str) -> Option<&Arc<dyn SettlementHandler>> {
        self.handlers.get(handler_id)
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn SettlementHandler>>,
}

impl HandlerRegistryBuilder {
    /// Registers a handler under `handler_id`. Registering the same id twice
    /// replaces the earlier handler.
    pub fn register(
        mut self,
        handler_id: impl Into<String>,
        handler: Arc<dyn SettlementHandler>,
    ) -> Self {
        self.handlers.insert(handler_id.into(), handler);
        self
    }

    /// Convenience for registering an async closure.
    pub fn register_fn<F, Fut>(self, handler_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invoice, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register(handler_id, Arc::new(FnHandler::new(f)))
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
