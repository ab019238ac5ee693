use crate::domain::correlation::Correlation;
use crate::domain::invoice::PaymentId;
use crate::domain::ports::CorrelationStore;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding pending correlations.
pub const CF_CORRELATIONS: &str = "correlations";

/// A persistent correlation store backed by RocksDB.
///
/// Records are keyed by the raw payment identifier bytes and stored as JSON
/// in a dedicated column family. Every mutation is a single atomic RocksDB
/// operation, so a crash mid-call leaves either the old or the new state on
/// disk, never a torn write.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbCorrelationStore {
    db: Arc<DB>,
}

impl RocksDbCorrelationStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// the correlations column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_CORRELATIONS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_CORRELATIONS)
            .ok_or_else(|| PaymentError::Storage("correlations column family missing".to_string()))
    }
}

#[async_trait]
impl CorrelationStore for RocksDbCorrelationStore {
    async fn put(&self, record: Correlation) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(&record)?;
        self.db.put_cf(cf, record.payment_id.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, payment_id: &PaymentId) -> Result<Option<Correlation>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, payment_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, payment_id: &PaymentId) -> Result<()> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, payment_id.as_bytes())?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Correlation>> {
        let cf = self.cf()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}
