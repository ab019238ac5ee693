use crate::domain::correlation::Correlation;
use crate::domain::invoice::PaymentId;
use crate::domain::ports::CorrelationStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory correlation store.
///
/// Uses `Arc<RwLock<HashMap<..>>>` to allow shared concurrent access. Suited
/// to tests and to deployments that accept losing pending correlations on
/// restart.
#[derive(Default, Clone)]
pub struct InMemoryCorrelationStore {
    records: Arc<RwLock<HashMap<PaymentId, Correlation>>>,
}

impl InMemoryCorrelationStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, record: Correlation) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.payment_id, record);
        Ok(())
    }

    async fn get(&self, payment_id: &PaymentId) -> Result<Option<Correlation>> {
        let records = self.records.read().await;
        Ok(records.get(payment_id).cloned())
    }

    async fn delete(&self, payment_id: &PaymentId) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(payment_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Correlation>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}
