//! Testing utilities for the sectest workspace
//!
//! Fake capability providers, fixture tests and a ready-wired service.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sectest_bus::{names, CapabilityBus, ProviderError};
use sectest_core::{
    Category, ListQuery, MemoryStore, NewTest, Page, ProjectId, SecurityTest, SecurityThreshold,
    ServiceConfig, StaticSecrets, StoreError, TestId, TestKey, TestService, TestStore,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub const RESULTS_URL: &str = "https://results.example";
pub const AUTH_TOKEN: &str = "t0k3n";

pub fn fixture_draft(project_id: i64, name: &str) -> NewTest {
    NewTest::new(ProjectId(project_id), "acme", name, "Carrier default config")
}

pub fn fixture_test(project_id: i64, name: &str) -> SecurityTest {
    fixture_draft(project_id, name).into_test(TestId(1))
}

/// Secrets every execution document needs
pub fn fixture_secrets() -> StaticSecrets {
    StaticSecrets::new()
        .with_global("galloper_url", RESULTS_URL)
        .with_global("auth_token", AUTH_TOKEN)
        .with_global("rabbit_host", "rabbitmq")
        .with_global("rabbit_user", "guest")
        .with_global("rabbit_password", "guest-pass")
}

/// Service over an in-memory store with fixture secrets
pub fn fixture_service(bus: &CapabilityBus) -> (TestService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (service_over(bus, store.clone()), store)
}

/// Service over any store with fixture secrets
pub fn service_over(bus: &CapabilityBus, store: Arc<dyn TestStore>) -> TestService {
    TestService::new(
        bus.clone(),
        store,
        Arc::new(fixture_secrets()),
        ServiceConfig::default(),
    )
}

/// Answer project lookups for one project, fail for every other id
pub fn register_project(bus: &CapabilityBus, id: i64, name: &'static str) {
    bus.register_fn(names::PROJECT_GET_OR_404, move |payload| async move {
        if payload["project_id"] == json!(id) {
            Ok(json!({ "id": id, "name": name }))
        } else {
            Err(ProviderError::new(format!("project {} not found", payload["project_id"])))
        }
    });
}

/// Register a fragment provider answering with a fixed pair
pub fn register_fragment(
    bus: &CapabilityBus,
    category: Category,
    integration: &str,
    output_key: &'static str,
    fragment: Value,
) {
    bus.register_fn(
        names::config_fragment(category.as_str(), integration),
        move |_| {
            let answer = json!([output_key, fragment.clone()]);
            async move { Ok(answer) }
        },
    );
}

/// Fake scheduling subsystem recording every request
#[derive(Debug)]
pub struct RecordingScheduler {
    next_id: AtomicI64,
    records: Mutex<BTreeMap<i64, Value>>,
    creates: Mutex<Vec<Value>>,
    deletes: Mutex<Vec<Vec<i64>>>,
}

impl RecordingScheduler {
    /// Install on a bus, handing out ids from `first_id`
    pub fn install(bus: &CapabilityBus, first_id: i64) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            next_id: AtomicI64::new(first_id),
            records: Mutex::new(BTreeMap::new()),
            creates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        });

        let s = Arc::clone(&scheduler);
        bus.register_fn(names::CREATE_SCHEDULE, move |payload| {
            let id = s.create(payload);
            async move { Ok(json!(id)) }
        });

        let s = Arc::clone(&scheduler);
        bus.register_fn(names::DELETE_SCHEDULES, move |payload| {
            s.delete(&payload);
            async { Ok(Value::Null) }
        });

        let s = Arc::clone(&scheduler);
        bus.register_fn(names::LOAD_SCHEDULES, move |payload| {
            let records = s.load(&payload);
            async move { Ok(records) }
        });

        scheduler
    }

    /// Pretend a schedule already exists
    pub fn seed(&self, id: i64, record: Value) {
        self.records.lock().insert(id, record);
    }

    pub fn creates(&self) -> Vec<Value> {
        self.creates.lock().clone()
    }

    pub fn deletes(&self) -> Vec<Vec<i64>> {
        self.deletes.lock().clone()
    }

    pub fn live_ids(&self) -> Vec<i64> {
        self.records.lock().keys().copied().collect()
    }

    fn create(&self, payload: Value) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = payload.clone();
        record["id"] = json!(id);
        self.records.lock().insert(id, record);
        self.creates.lock().push(payload);
        id
    }

    fn delete(&self, payload: &Value) {
        let ids = ids_of(payload);
        let mut records = self.records.lock();
        for id in &ids {
            records.remove(id);
        }
        self.deletes.lock().push(ids);
    }

    fn load(&self, payload: &Value) -> Value {
        let records = self.records.lock();
        let found: Vec<Value> = ids_of(payload)
            .into_iter()
            .filter_map(|id| records.get(&id).cloned())
            .collect();
        Value::Array(found)
    }
}

fn ids_of(payload: &Value) -> Vec<i64> {
    payload["ids"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Fake task runner recording dispatched descriptors
#[derive(Debug, Default)]
pub struct RecordingRunner {
    dispatched: Mutex<Vec<Value>>,
}

impl RecordingRunner {
    pub fn install(bus: &CapabilityBus) -> Arc<Self> {
        let runner = Arc::new(Self::default());
        let r = Arc::clone(&runner);
        bus.register_fn(names::RUN_TASK, move |payload| {
            let mut dispatched = r.dispatched.lock();
            dispatched.push(payload);
            let task_id = format!("task-{}", dispatched.len());
            async move { Ok(json!({ "task_id": task_id })) }
        });
        runner
    }

    pub fn dispatched(&self) -> Vec<Value> {
        self.dispatched.lock().clone()
    }
}

/// In-memory store whose writes can be made to fail
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    threshold_error: Option<String>,
    update_error: Option<(TestId, String)>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every threshold insert fails with a backend error
    pub fn failing_thresholds(mut self, message: &str) -> Self {
        self.threshold_error = Some(message.to_string());
        self
    }

    /// Updates of one test fail with a backend error
    pub fn failing_updates_of(mut self, id: TestId, message: &str) -> Self {
        self.update_error = Some((id, message.to_string()));
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl TestStore for FailingStore {
    async fn insert_test(&self, draft: NewTest) -> Result<SecurityTest, StoreError> {
        self.inner.insert_test(draft).await
    }

    async fn get_test(
        &self,
        project_id: ProjectId,
        key: &TestKey,
    ) -> Result<Option<SecurityTest>, StoreError> {
        self.inner.get_test(project_id, key).await
    }

    async fn list_tests(
        &self,
        project_id: ProjectId,
        query: &ListQuery,
    ) -> Result<Page<SecurityTest>, StoreError> {
        self.inner.list_tests(project_id, query).await
    }

    async fn update_test(&self, test: &SecurityTest) -> Result<(), StoreError> {
        match &self.update_error {
            Some((id, message)) if *id == test.id => Err(StoreError::Backend(message.clone())),
            _ => self.inner.update_test(test).await,
        }
    }

    async fn delete_tests(
        &self,
        project_id: ProjectId,
        ids: &[TestId],
    ) -> Result<Vec<TestId>, StoreError> {
        self.inner.delete_tests(project_id, ids).await
    }

    async fn insert_threshold(&self, threshold: SecurityThreshold) -> Result<(), StoreError> {
        match &self.threshold_error {
            Some(message) => Err(StoreError::Backend(message.clone())),
            None => self.inner.insert_threshold(threshold).await,
        }
    }

    async fn get_threshold(
        &self,
        project_id: ProjectId,
        test_uid: &str,
    ) -> Result<Option<SecurityThreshold>, StoreError> {
        self.inner.get_threshold(project_id, test_uid).await
    }
}
