//! Schedule reconciliation
//!
//! Brings the scheduling subsystem in line with the schedules a test should
//! have. Existing schedules are kept by id, new ones are created one by one
//! in input order, and everything no longer wanted is deleted in one batch.
//! A schedule whose creation gets no answer is dropped, not retried.

use crate::error::StoreError;
use crate::store::TestStore;
use crate::types::{ScheduleId, ScheduleSpec, SecurityTest};
use sectest_bus::{names, CapabilityBus};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// What a reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids of schedules created, in creation order
    pub created: Vec<ScheduleId>,
    /// Ids of existing schedules kept
    pub kept: Vec<ScheduleId>,
    /// Ids requested for deletion
    pub deleted: BTreeSet<ScheduleId>,
    /// New schedules that could not be created
    pub dropped: usize,
}

impl ReconcileReport {
    /// Check if nothing was created or deleted
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.dropped == 0
    }
}

/// Reconciles a test's schedules through the capability bus
#[derive(Clone)]
pub struct ScheduleReconciler {
    bus: CapabilityBus,
    store: Arc<dyn TestStore>,
    timeout: Duration,
}

impl ScheduleReconciler {
    /// Create reconciler
    #[must_use]
    pub fn new(bus: CapabilityBus, store: Arc<dyn TestStore>, timeout: Duration) -> Self {
        Self {
            bus,
            store,
            timeout,
        }
    }

    /// Apply the desired schedule set to a test and persist it
    ///
    /// # Workflow
    /// 1. Ids present in `desired` are kept, everything else currently held is deleted
    /// 2. Specs without an id are created in input order
    /// 3. One batch delete is issued for the removed ids
    /// 4. The test is persisted with its new schedule set
    ///
    /// The resulting `test.schedules` is authoritative, even when it differs
    /// from what was requested.
    ///
    /// # Errors
    /// Returns error only if persisting the test fails. The delete request has
    /// already been issued by then.
    pub async fn reconcile(
        &self,
        test: &mut SecurityTest,
        desired: &[ScheduleSpec],
    ) -> Result<ReconcileReport, StoreError> {
        let desired_ids: BTreeSet<ScheduleId> =
            desired.iter().filter_map(ScheduleSpec::existing_id).collect();
        let to_delete: BTreeSet<ScheduleId> =
            test.schedules.difference(&desired_ids).copied().collect();

        let mut report = ReconcileReport::default();
        test.schedules.clear();

        for spec in desired {
            if let Some(id) = spec.existing_id() {
                test.schedules.insert(id);
                report.kept.push(id);
                continue;
            }

            match self.create(test, spec).await {
                Some(id) => {
                    test.schedules.insert(id);
                    report.created.push(id);
                }
                None => report.dropped += 1,
            }
        }

        if !to_delete.is_empty() {
            self.delete(test, &to_delete).await;
        }
        report.deleted = to_delete;

        self.store.update_test(test).await?;

        tracing::info!(
            test_id = test.id.0,
            created = report.created.len(),
            kept = report.kept.len(),
            deleted = report.deleted.len(),
            dropped = report.dropped,
            "schedules reconciled"
        );

        Ok(report)
    }

    async fn create(&self, test: &SecurityTest, spec: &ScheduleSpec) -> Option<ScheduleId> {
        let mut data = spec.fields.clone();
        data.insert("test_id".to_string(), json!(test.id));
        data.insert("project_id".to_string(), json!(test.project_id));

        match self
            .bus
            .call_typed::<_, ScheduleId>(names::CREATE_SCHEDULE, self.timeout, &data)
            .await
        {
            Ok(id) => {
                tracing::debug!(test_id = test.id.0, schedule_id = id.0, "schedule created");
                Some(id)
            }
            Err(e) if e.is_absent() => {
                tracing::warn!(test_id = test.id.0, "no scheduling provider, schedule not created: {}", e);
                None
            }
            Err(e) => {
                tracing::error!(test_id = test.id.0, "schedule creation failed: {}", e);
                None
            }
        }
    }

    async fn delete(&self, test: &SecurityTest, ids: &BTreeSet<ScheduleId>) {
        let payload = json!({ "ids": ids });

        match self
            .bus
            .call(names::DELETE_SCHEDULES, self.timeout, payload)
            .await
        {
            Ok(_) => {
                tracing::debug!(test_id = test.id.0, count = ids.len(), "schedules deleted");
            }
            Err(e) if e.is_absent() => {
                tracing::warn!(test_id = test.id.0, "no scheduling provider, schedules not deleted: {}", e);
            }
            Err(e) => {
                tracing::error!(test_id = test.id.0, "schedule deletion failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ScheduleReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleReconciler")
            .field("bus", &self.bus)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SecurityTest {
    /// Reconcile this test's schedules against `desired` and persist it
    ///
    /// # Errors
    /// See [`ScheduleReconciler::reconcile`]
    pub async fn change_schedules(
        &mut self,
        reconciler: &ScheduleReconciler,
        desired: &[ScheduleSpec],
    ) -> Result<ReconcileReport, StoreError> {
        reconciler.reconcile(self, desired).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{NewTest, ProjectId, TestId};
    use parking_lot::Mutex;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicI64, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Harness {
        bus: CapabilityBus,
        store: Arc<MemoryStore>,
        reconciler: ScheduleReconciler,
        deletes: Arc<Mutex<Vec<Value>>>,
        creates: Arc<Mutex<Vec<Value>>>,
    }

    fn harness(with_scheduler: bool) -> Harness {
        let bus = CapabilityBus::new();
        let store = Arc::new(MemoryStore::new());
        let deletes = Arc::new(Mutex::new(Vec::new()));
        let creates = Arc::new(Mutex::new(Vec::new()));

        if with_scheduler {
            let next = Arc::new(AtomicI64::new(100));
            let created = Arc::clone(&creates);
            bus.register_fn(names::CREATE_SCHEDULE, move |payload| {
                created.lock().push(payload);
                let id = next.fetch_add(1, Ordering::SeqCst);
                async move { Ok(json!(id)) }
            });
            let deleted = Arc::clone(&deletes);
            bus.register_fn(names::DELETE_SCHEDULES, move |payload| {
                deleted.lock().push(payload);
                async { Ok(Value::Null) }
            });
        }

        let reconciler = ScheduleReconciler::new(bus.clone(), store.clone(), TIMEOUT);
        Harness {
            bus,
            store,
            reconciler,
            deletes,
            creates,
        }
    }

    async fn stored_test(store: &MemoryStore, schedules: &[i64]) -> SecurityTest {
        let mut test = store
            .insert_test(NewTest::new(ProjectId(5), "demo", "nightly", "default"))
            .await
            .unwrap();
        test.schedules = schedules.iter().copied().map(ScheduleId).collect();
        store.update_test(&test).await.unwrap();
        test
    }

    fn new_spec(cron: &str) -> ScheduleSpec {
        let mut fields = Map::new();
        fields.insert("cron".to_string(), json!(cron));
        ScheduleSpec::new(fields)
    }

    #[tokio::test]
    async fn keeps_creates_and_deletes() {
        let h = harness(true);
        let mut test = stored_test(&h.store, &[1, 2, 3]).await;

        let desired = vec![
            ScheduleSpec::existing(ScheduleId(2)),
            ScheduleSpec::existing(ScheduleId(3)),
            new_spec("0 2 * * *"),
        ];
        let report = h.reconciler.reconcile(&mut test, &desired).await.unwrap();

        assert_eq!(report.created, vec![ScheduleId(100)]);
        assert_eq!(report.deleted, BTreeSet::from([ScheduleId(1)]));
        assert_eq!(
            test.schedules,
            BTreeSet::from([ScheduleId(2), ScheduleId(3), ScheduleId(100)])
        );
        assert_eq!(h.deletes.lock().as_slice(), &[json!({ "ids": [1] })]);
    }

    #[tokio::test]
    async fn create_payload_carries_test_and_project() {
        let h = harness(true);
        let mut test = stored_test(&h.store, &[]).await;

        h.reconciler
            .reconcile(&mut test, &[new_spec("*/5 * * * *")])
            .await
            .unwrap();

        let payload = h.creates.lock()[0].clone();
        assert_eq!(payload["cron"], json!("*/5 * * * *"));
        assert_eq!(payload["test_id"], json!(test.id.0));
        assert_eq!(payload["project_id"], json!(5));
    }

    #[tokio::test]
    async fn absent_scheduler_drops_new_schedules() {
        let h = harness(false);
        let mut test = stored_test(&h.store, &[4]).await;

        let report = h
            .reconciler
            .reconcile(
                &mut test,
                &[ScheduleSpec::existing(ScheduleId(4)), new_spec("@daily")],
            )
            .await
            .unwrap();

        assert_eq!(report.dropped, 1);
        assert!(report.created.is_empty());
        assert_eq!(test.schedules, BTreeSet::from([ScheduleId(4)]));
        assert!(h.bus.is_empty());
    }

    #[tokio::test]
    async fn empty_desired_set_deletes_everything() {
        let h = harness(true);
        let mut test = stored_test(&h.store, &[5, 7]).await;

        let report = h.reconciler.reconcile(&mut test, &[]).await.unwrap();

        assert_eq!(report.deleted, BTreeSet::from([ScheduleId(5), ScheduleId(7)]));
        assert!(test.schedules.is_empty());
        assert_eq!(h.deletes.lock().as_slice(), &[json!({ "ids": [5, 7] })]);
    }

    #[tokio::test]
    async fn absent_scheduler_still_empties_the_set() {
        let h = harness(false);
        let mut test = stored_test(&h.store, &[5, 7]).await;

        let report = h.reconciler.reconcile(&mut test, &[]).await.unwrap();

        assert_eq!(report.deleted, BTreeSet::from([ScheduleId(5), ScheduleId(7)]));
        assert!(test.schedules.is_empty());
        assert!(h.deletes.lock().is_empty());

        let stored = h
            .store
            .get_test(test.project_id, &test.id.into())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.schedules.is_empty());
    }

    #[tokio::test]
    async fn nothing_to_delete_skips_delete_call() {
        let h = harness(true);
        let mut test = stored_test(&h.store, &[8]).await;

        let report = h
            .reconciler
            .reconcile(&mut test, &[ScheduleSpec::existing(ScheduleId(8))])
            .await
            .unwrap();

        assert!(report.is_noop());
        assert!(h.deletes.lock().is_empty());
        assert!(h.creates.lock().is_empty());
    }

    #[tokio::test]
    async fn persisted_row_matches_in_memory_set() {
        let h = harness(true);
        let mut test = stored_test(&h.store, &[1]).await;

        test.change_schedules(&h.reconciler, &[new_spec("@hourly")])
            .await
            .unwrap();

        let stored = h
            .store
            .get_test(test.project_id, &test.id.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.schedules, test.schedules);
    }

    #[tokio::test]
    async fn persist_failure_is_surfaced() {
        let h = harness(true);
        let mut test =
            NewTest::new(ProjectId(5), "demo", "ghost", "default").into_test(TestId(77));

        let err = h.reconciler.reconcile(&mut test, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
