//! Persistence of tests and thresholds
//!
//! [`TestStore`] is the seam to the database. [`MemoryStore`] keeps rows in
//! process; every write replaces a row under one lock, so readers never see
//! a half-updated test.

use crate::error::StoreError;
use crate::types::{NewTest, ProjectId, SecurityTest, SecurityThreshold, TestId, TestKey};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// List window and filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return, unlimited if `None`
    pub limit: Option<usize>,
    /// Case-insensitive substring filter on the test name
    pub search: Option<String>,
}

impl ListQuery {
    /// Unfiltered, unlimited query
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// With window
    #[inline]
    #[must_use]
    pub fn with_window(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// With name filter
    #[inline]
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// One page of rows plus the unpaged total
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Rows matching the filter, before windowing
    pub total: usize,
    /// Rows in the window
    pub rows: Vec<T>,
}

/// Transactional store of tests and thresholds
#[async_trait]
pub trait TestStore: Send + Sync {
    /// Insert a new test, assigning its id
    async fn insert_test(&self, draft: NewTest) -> Result<SecurityTest, StoreError>;

    /// Fetch one test of a project
    async fn get_test(
        &self,
        project_id: ProjectId,
        key: &TestKey,
    ) -> Result<Option<SecurityTest>, StoreError>;

    /// List tests of a project, ordered by id
    async fn list_tests(
        &self,
        project_id: ProjectId,
        query: &ListQuery,
    ) -> Result<Page<SecurityTest>, StoreError>;

    /// Replace a test row atomically
    async fn update_test(&self, test: &SecurityTest) -> Result<(), StoreError>;

    /// Delete tests of a project by id, returns the ids actually removed
    async fn delete_tests(
        &self,
        project_id: ProjectId,
        ids: &[TestId],
    ) -> Result<Vec<TestId>, StoreError>;

    /// Insert the threshold record paired with a test
    async fn insert_threshold(&self, threshold: SecurityThreshold) -> Result<(), StoreError>;

    /// Fetch the threshold record paired with a test
    async fn get_threshold(
        &self,
        project_id: ProjectId,
        test_uid: &str,
    ) -> Result<Option<SecurityThreshold>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    tests: BTreeMap<TestId, SecurityTest>,
    thresholds: Vec<SecurityThreshold>,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tests across all projects
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.state.read().tests.len()
    }

    /// Number of stored thresholds across all projects
    #[must_use]
    pub fn threshold_count(&self) -> usize {
        self.state.read().thresholds.len()
    }
}

#[async_trait]
impl TestStore for MemoryStore {
    async fn insert_test(&self, draft: NewTest) -> Result<SecurityTest, StoreError> {
        let mut state = self.state.write();

        if state.tests.values().any(|t| t.test_uid == draft.test_uid) {
            return Err(StoreError::Conflict(format!(
                "test uid {} already exists",
                draft.test_uid
            )));
        }

        state.last_id += 1;
        let test = draft.into_test(TestId(state.last_id));
        state.tests.insert(test.id, test.clone());
        Ok(test)
    }

    async fn get_test(
        &self,
        project_id: ProjectId,
        key: &TestKey,
    ) -> Result<Option<SecurityTest>, StoreError> {
        let state = self.state.read();
        Ok(state
            .tests
            .values()
            .find(|t| t.project_id == project_id && key.matches(t))
            .cloned())
    }

    async fn list_tests(
        &self,
        project_id: ProjectId,
        query: &ListQuery,
    ) -> Result<Page<SecurityTest>, StoreError> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let state = self.state.read();

        let matching: Vec<&SecurityTest> = state
            .tests
            .values()
            .filter(|t| t.project_id == project_id)
            .filter(|t| {
                needle
                    .as_deref()
                    .map_or(true, |n| t.name.to_lowercase().contains(n))
            })
            .collect();

        let rows = matching
            .iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|t| (*t).clone())
            .collect();

        Ok(Page {
            total: matching.len(),
            rows,
        })
    }

    async fn update_test(&self, test: &SecurityTest) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let existing = state
            .tests
            .get_mut(&test.id)
            .ok_or(StoreError::NotFound(test.id))?;

        if existing.test_uid != test.test_uid {
            return Err(StoreError::ImmutableUid { id: test.id });
        }

        *existing = test.clone();
        Ok(())
    }

    async fn delete_tests(
        &self,
        project_id: ProjectId,
        ids: &[TestId],
    ) -> Result<Vec<TestId>, StoreError> {
        let mut state = self.state.write();
        let mut removed = Vec::new();

        for id in ids {
            let owned = state
                .tests
                .get(id)
                .is_some_and(|t| t.project_id == project_id);
            if owned && state.tests.remove(id).is_some() {
                removed.push(*id);
            }
        }

        Ok(removed)
    }

    async fn insert_threshold(&self, threshold: SecurityThreshold) -> Result<(), StoreError> {
        let mut state = self.state.write();

        if state
            .thresholds
            .iter()
            .any(|t| t.project_id == threshold.project_id && t.test_uid == threshold.test_uid)
        {
            return Err(StoreError::Conflict(format!(
                "threshold for test {} already exists",
                threshold.test_uid
            )));
        }

        state.thresholds.push(threshold);
        Ok(())
    }

    async fn get_threshold(
        &self,
        project_id: ProjectId,
        test_uid: &str,
    ) -> Result<Option<SecurityThreshold>, StoreError> {
        let state = self.state.read();
        Ok(state
            .thresholds
            .iter()
            .find(|t| t.project_id == project_id && t.test_uid == test_uid)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleId;

    fn draft(project: i64, name: &str) -> NewTest {
        NewTest::new(ProjectId(project), "demo", name, "Carrier default config")
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let a = store.insert_test(draft(1, "a")).await.unwrap();
        let b = store.insert_test(draft(1, "b")).await.unwrap();

        assert_eq!(a.id, TestId(1));
        assert_eq!(b.id, TestId(2));
        assert_eq!(store.test_count(), 2);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_uid() {
        let store = MemoryStore::new();
        let first = draft(1, "a");
        let mut second = draft(1, "b");
        second.test_uid = first.test_uid.clone();

        store.insert_test(first).await.unwrap();
        let err = store.insert_test(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn get_by_id_or_uid_scoped_to_project() {
        let store = MemoryStore::new();
        let test = store.insert_test(draft(1, "a")).await.unwrap();

        let by_id = store.get_test(ProjectId(1), &TestKey::Id(test.id)).await.unwrap();
        let by_uid = store
            .get_test(ProjectId(1), &TestKey::Uid(test.test_uid.clone()))
            .await
            .unwrap();
        let other_project = store.get_test(ProjectId(2), &TestKey::Id(test.id)).await.unwrap();

        assert_eq!(by_id.as_ref(), Some(&test));
        assert_eq!(by_uid.as_ref(), Some(&test));
        assert!(other_project.is_none());
    }

    #[tokio::test]
    async fn list_filters_and_windows() {
        let store = MemoryStore::new();
        for name in ["nightly-api", "weekly-web", "nightly-web"] {
            store.insert_test(draft(1, name)).await.unwrap();
        }
        store.insert_test(draft(2, "nightly-other")).await.unwrap();

        let page = store
            .list_tests(ProjectId(1), &ListQuery::all().with_search("NIGHTLY"))
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let page = store
            .list_tests(ProjectId(1), &ListQuery::all().with_window(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].name, "weekly-web");
    }

    #[tokio::test]
    async fn update_replaces_row() {
        let store = MemoryStore::new();
        let mut test = store.insert_test(draft(1, "a")).await.unwrap();
        test.schedules.insert(ScheduleId(9));

        store.update_test(&test).await.unwrap();
        let stored = store.get_test(ProjectId(1), &TestKey::Id(test.id)).await.unwrap().unwrap();
        assert!(stored.schedules.contains(&ScheduleId(9)));
    }

    #[tokio::test]
    async fn update_rejects_uid_change() {
        let store = MemoryStore::new();
        let mut test = store.insert_test(draft(1, "a")).await.unwrap();
        test.test_uid = "rewritten".to_string();

        let err = store.update_test(&test).await.unwrap_err();
        assert!(matches!(err, StoreError::ImmutableUid { .. }));
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let store = MemoryStore::new();
        let test = draft(1, "a").into_test(TestId(42));
        let err = store.update_test(&test).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(TestId(42))));
    }

    #[tokio::test]
    async fn delete_only_touches_owning_project() {
        let store = MemoryStore::new();
        let a = store.insert_test(draft(1, "a")).await.unwrap();
        let b = store.insert_test(draft(2, "b")).await.unwrap();

        let removed = store.delete_tests(ProjectId(1), &[a.id, b.id]).await.unwrap();
        assert_eq!(removed, vec![a.id]);
        assert_eq!(store.test_count(), 1);
    }

    #[tokio::test]
    async fn threshold_is_one_to_one() {
        let store = MemoryStore::new();
        let test = store.insert_test(draft(1, "a")).await.unwrap();

        store.insert_threshold(SecurityThreshold::for_test(&test)).await.unwrap();
        let err = store
            .insert_threshold(SecurityThreshold::for_test(&test))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = store.get_threshold(ProjectId(1), &test.test_uid).await.unwrap();
        assert_eq!(stored.unwrap().levels.critical, -1);
    }
}
