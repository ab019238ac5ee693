use crate::domain::correlation::Correlation;
use crate::domain::invoice::{Invoice, InvoiceParams, InvoiceState, IssuedInvoice, PaymentId};
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Node-wide live feed of invoices transitioning state.
pub type SettlementStream = Pin<Box<dyn Stream<Item = Result<Invoice>> + Send>>;

/// Live feed of state transitions for a single invoice.
pub type InvoiceUpdateStream = Pin<Box<dyn Stream<Item = Result<InvoiceState>> + Send>>;

/// Capability interface over the payment node.
///
/// The node is the sole source of truth for invoice state. Any concrete
/// implementation satisfying this trait is interchangeable, including fully
/// in-memory fakes for tests.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn create_invoice(&self, params: InvoiceParams) -> Result<IssuedInvoice>;

    async fn lookup_invoice(&self, payment_id: &PaymentId) -> Result<Invoice>;

    async fn subscribe_settlements(&self) -> Result<SettlementStream>;

    async fn subscribe_single_invoice(&self, payment_id: &PaymentId)
    -> Result<InvoiceUpdateStream>;
}

/// Durable table of pending correlations, keyed by payment identifier.
///
/// Each operation is atomic with respect to concurrent callers; a crash
/// mid-call leaves either the old or the new state, never a torn write.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Inserts or overwrites the record keyed by its payment identifier.
    async fn put(&self, record: Correlation) -> Result<()>;

    async fn get(&self, payment_id: &PaymentId) -> Result<Option<Correlation>>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, payment_id: &PaymentId) -> Result<()>;

    /// Every persisted record, in no particular order. Used by recovery.
    async fn list_all(&self) -> Result<Vec<Correlation>>;
}

pub type NodeClientRef = Arc<dyn NodeClient>;
pub type CorrelationStoreRef = Arc<dyn CorrelationStore>;
