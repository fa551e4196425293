//! In-memory report store.
//!
//! The only shared mutable state in the report service. Writers take the
//! write lock just long enough to push; readers copy the vector under the read
//! lock and never see a live reference. No I/O happens under either lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Report derived from one `OrderCreated` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReport {
    /// Order id from the event
    pub order_id: String,
    /// Order total
    pub total_price: i64,
    /// Customer id
    pub customer_id: i64,
    /// Product id
    pub product_id: i64,
    /// When the order was created (or processed, if the event's timestamp was unreadable)
    pub created_at: DateTime<Utc>,
    /// When the consumer processed the event
    pub processed_at: DateTime<Utc>,
}

/// Append-only, process-lifetime collection of reports.
#[derive(Debug, Default)]
pub struct ReportStore {
    reports: RwLock<Vec<OrderReport>>,
}

impl ReportStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a report and return the new number of stored reports.
    pub fn append(&self, report: OrderReport) -> usize {
        // Poison is ignored: a push never leaves the Vec partially written
        let mut reports = self.reports.write().unwrap_or_else(PoisonError::into_inner);
        reports.push(report);
        reports.len()
    }

    /// Copy of every report, in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OrderReport> {
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of stored reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no report has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn report(n: i64) -> OrderReport {
        let now = Utc::now();
        OrderReport {
            order_id: format!("order-{n}"),
            total_price: n,
            customer_id: 1,
            product_id: 1,
            created_at: now,
            processed_at: now,
        }
    }

    #[test]
    fn append_then_snapshot() {
        let store = ReportStore::new();
        assert!(store.is_empty());

        assert_eq!(store.append(report(1)), 1);
        assert_eq!(store.append(report(2)), 2);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].order_id, "order-1");
        assert_eq!(snapshot[1].order_id, "order-2");
    }

    #[test]
    fn snapshot_is_detached() {
        let store = ReportStore::new();
        store.append(report(1));

        let snapshot = store.snapshot();
        store.append(report(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_all_kept() {
        const N: i64 = 500;
        let store = Arc::new(ReportStore::new());

        let tasks: Vec<_> = (0..N)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.append(report(n));
                    // Interleave reads with writes
                    let _ = store.snapshot();
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.is_ok());
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), usize::try_from(N).unwrap_or_default());
        let distinct: HashSet<_> = snapshot.iter().map(|r| r.order_id.clone()).collect();
        assert_eq!(distinct.len(), snapshot.len());
        assert!(snapshot.iter().all(|r| r.order_id == format!("order-{}", r.total_price)));
    }
}
