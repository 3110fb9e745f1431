//! Payment record storage.
//!
//! `PaymentStore` is the port the dispatch engine and router talk to. Two
//! adapters exist: [`InMemoryPaymentStore`] here and
//! [`PostgresPaymentStore`](crate::payments::postgres::PostgresPaymentStore).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::payments::types::{PaymentRecord, PaymentSummary, SummaryRange};

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage connection error: {0}")]
    Connection(String),
    #[error("storage query error: {0}")]
    Query(String),
}

/// Storage for confirmed payments. Implementations must be safe for concurrent use.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persist a confirmed payment.
    async fn insert(&self, record: PaymentRecord) -> Result<(), StoreError>;

    /// Per-processor count and amount for records whose `created_at` lies in `range`.
    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary, StoreError>;

    /// Delete every record.
    async fn purge(&self) -> Result<(), StoreError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A thread-safe in-memory store.
///
/// Uses `Arc<RwLock<Vec<PaymentRecord>>>` so clones share the same records.
/// No deduplication: the same correlation id may be stored twice.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPaymentStore {
    records: Arc<RwLock<Vec<PaymentRecord>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored records, in insertion order.
    pub async fn records(&self) -> Vec<PaymentRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, record: PaymentRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary, StoreError> {
        let records = self.records.read().await;
        let mut summary = PaymentSummary::default();
        for record in records.iter().filter(|r| range.contains(r.created_at)) {
            summary.totals_mut(record.processor).add(record.amount);
        }
        Ok(summary)
    }

    async fn purge(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{PaymentSubmission, Processor};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    async fn seeded() -> InMemoryPaymentStore {
        let store = InMemoryPaymentStore::new();
        let rows = [
            ("a", dec!(10.00), Processor::Default, 1),
            ("b", dec!(5.50), Processor::Default, 2),
            ("c", dec!(19.90), Processor::Fallback, 2),
            ("d", dec!(1.00), Processor::Fallback, 3),
        ];
        for (id, amount, processor, day) in rows {
            store
                .insert(PaymentSubmission::new(id, amount, at(day)).into_record(processor))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn summary_over_all_records() {
        let store = seeded().await;
        let summary = store.summary(SummaryRange::default()).await.unwrap();
        assert_eq!(summary.default.total_requests, 2);
        assert_eq!(summary.default.total_amount, dec!(15.50));
        assert_eq!(summary.fallback.total_requests, 2);
        assert_eq!(summary.fallback.total_amount, dec!(20.90));
    }

    #[tokio::test]
    async fn summary_respects_inclusive_window() {
        let store = seeded().await;
        let summary = store
            .summary(SummaryRange::new(Some(at(2)), Some(at(2))))
            .await
            .unwrap();
        assert_eq!(summary.default.total_requests, 1);
        assert_eq!(summary.default.total_amount, dec!(5.50));
        assert_eq!(summary.fallback.total_requests, 1);
        assert_eq!(summary.fallback.total_amount, dec!(19.90));

        let open_ended = store.summary(SummaryRange::new(Some(at(3)), None)).await.unwrap();
        assert_eq!(open_ended.default.total_requests, 0);
        assert_eq!(open_ended.fallback.total_requests, 1);
    }

    #[tokio::test]
    async fn purge_clears_records() {
        let store = seeded().await;
        store.purge().await.unwrap();
        assert!(store.is_empty().await);
        let summary = store.summary(SummaryRange::default()).await.unwrap();
        assert_eq!(summary, PaymentSummary::default());
    }
}
