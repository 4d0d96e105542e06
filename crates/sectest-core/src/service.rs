//! Test management service
//!
//! Transport-free handlers for listing, creating, deleting and running
//! security tests. Each call returns a typed result or a [`ServiceError`]
//! carrying an HTTP-style status code for the embedding transport.

use crate::assembler::{ExecutionAssembler, ExecutionDocument, OutputMode};
use crate::config::ServiceConfig;
use crate::error::{BuildError, FieldError, ServiceError};
use crate::logs;
use crate::schedules::{ReconcileReport, ScheduleReconciler};
use crate::secrets::SecretResolver;
use crate::store::{ListQuery, TestStore};
use crate::types::{
    Integrations, JobKind, NewTest, Project, ProjectId, ScheduleSpec, SecurityTest,
    SecurityThreshold, TestId, TestKey, Thresholds,
};
use sectest_bus::{names, CapabilityBus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Maximum test name length
pub const MAX_NAME_LEN: usize = 128;

/// Maximum description length
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Maximum scan location length
pub const MAX_SCAN_LOCATION_LEN: usize = 128;

/// Request body of a test creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTestRequest {
    /// Test name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Free-form parameter objects
    pub test_parameters: Vec<Value>,
    /// Selected integrations
    pub integrations: Integrations,
    /// Scan location, the default channel alias when absent
    pub scan_location: Option<String>,
    /// What is scanned
    pub source: Value,
    /// Results linkage
    pub results_test_id: Option<i64>,
    /// Initial schedules
    pub scheduling: Vec<ScheduleSpec>,
    /// Run the test right after creating it
    pub run_test: bool,
}

impl CreateTestRequest {
    /// Create request with a name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// With integrations
    #[inline]
    #[must_use]
    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    /// With initial schedules
    #[inline]
    #[must_use]
    pub fn with_scheduling(mut self, scheduling: Vec<ScheduleSpec>) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// With scan location
    #[inline]
    #[must_use]
    pub fn with_scan_location(mut self, scan_location: impl Into<String>) -> Self {
        self.scan_location = Some(scan_location.into());
        self
    }

    /// Run right after creation
    #[inline]
    #[must_use]
    pub fn and_run(mut self) -> Self {
        self.run_test = true;
        self
    }

    /// Check field constraints
    ///
    /// # Errors
    /// Returns every rejected field
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "field required"));
        } else if self.name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError::new(
                "name",
                format!("at most {MAX_NAME_LEN} characters"),
            ));
        }
        if self
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            errors.push(FieldError::new(
                "description",
                format!("at most {MAX_DESCRIPTION_LEN} characters"),
            ));
        }
        if self
            .scan_location
            .as_ref()
            .is_some_and(|s| s.chars().count() > MAX_SCAN_LOCATION_LEN)
        {
            errors.push(FieldError::new(
                "scan_location",
                format!("at most {MAX_SCAN_LOCATION_LEN} characters"),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One page of the test list view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestList {
    /// Tests matching the filter
    pub total: usize,
    /// Rows enriched with schedule records and scanner names
    pub rows: Vec<Value>,
}

/// Outcome of a task dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    /// Dispatch accepted
    pub ok: bool,
    /// HTTP-style status code
    pub code: u16,
    /// Runner answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a test creation
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Test created
    Created(SecurityTest),
    /// Test created and dispatched
    Ran {
        /// The created test
        test: SecurityTest,
        /// Dispatch outcome
        run: RunResponse,
    },
}

impl CreateOutcome {
    /// The created test
    #[must_use]
    pub fn test(&self) -> &SecurityTest {
        match self {
            CreateOutcome::Created(test) | CreateOutcome::Ran { test, .. } => test,
        }
    }
}

/// Security test service
#[derive(Clone)]
pub struct TestService {
    bus: CapabilityBus,
    store: Arc<dyn TestStore>,
    reconciler: ScheduleReconciler,
    assembler: ExecutionAssembler,
    config: ServiceConfig,
}

impl TestService {
    /// Create service
    #[must_use]
    pub fn new(
        bus: CapabilityBus,
        store: Arc<dyn TestStore>,
        secrets: Arc<dyn SecretResolver>,
        config: ServiceConfig,
    ) -> Self {
        let reconciler =
            ScheduleReconciler::new(bus.clone(), Arc::clone(&store), config.timeouts.schedule());
        let assembler = ExecutionAssembler::new(bus.clone(), secrets, config.clone());
        Self {
            bus,
            store,
            reconciler,
            assembler,
            config,
        }
    }

    /// Schedule reconciler in use
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &ScheduleReconciler {
        &self.reconciler
    }

    /// Execution assembler in use
    #[inline]
    #[must_use]
    pub fn assembler(&self) -> &ExecutionAssembler {
        &self.assembler
    }

    /// List tests of a project
    ///
    /// Rows drop the raw schedule id set and carry instead the schedule
    /// records (`scheduling`) when the scheduling subsystem answers, plus the
    /// configured scanner names.
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn list_tests(
        &self,
        project_id: ProjectId,
        query: &ListQuery,
    ) -> Result<TestList, ServiceError> {
        let page = self.store.list_tests(project_id, query).await?;

        let mut rows = Vec::with_capacity(page.rows.len());
        for test in &page.rows {
            rows.push(self.list_row(test).await?);
        }

        Ok(TestList {
            total: page.total,
            rows,
        })
    }

    async fn list_row(&self, test: &SecurityTest) -> Result<Value, ServiceError> {
        let mut row = serde_json::to_value(test).map_err(BuildError::from)?;
        let scanners = json!(test.scanners());

        if let Value::Object(fields) = &mut row {
            fields.remove("schedules");
            if !test.schedules.is_empty() {
                if let Some(records) = self.load_schedules(test).await {
                    fields.insert("scheduling".to_string(), records);
                }
            }
            fields.insert("scanners".to_string(), scanners);
        }
        Ok(row)
    }

    async fn load_schedules(&self, test: &SecurityTest) -> Option<Value> {
        let payload = json!({ "ids": test.schedules });
        match self
            .bus
            .call(names::LOAD_SCHEDULES, self.config.timeouts.schedule_load(), payload)
            .await
        {
            Ok(records) => Some(records),
            Err(e) if e.is_absent() => {
                tracing::debug!(test_id = test.id.0, "schedule records unavailable: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!(test_id = test.id.0, "schedule records failed to load: {}", e);
                None
            }
        }
    }

    /// Fetch one test
    ///
    /// # Errors
    /// Returns error if the test does not exist or the store fails
    pub async fn get_test(
        &self,
        project_id: ProjectId,
        key: &TestKey,
    ) -> Result<SecurityTest, ServiceError> {
        self.store
            .get_test(project_id, key)
            .await?
            .ok_or_else(|| ServiceError::TestNotFound(key.to_string()))
    }

    /// Create a test, its threshold record and its initial schedules
    ///
    /// # Workflow
    /// 1. Validate the request
    /// 2. Look up the owning project
    /// 3. Insert the test
    /// 4. Reconcile the initial schedules
    /// 5. Insert the unset threshold record
    /// 6. Dispatch the test if requested
    ///
    /// A failure in steps 4 or 5 discards the test: its new schedules are
    /// deleted and its row is removed before the error is returned. A failed
    /// dispatch is reported in the [`RunResponse`] and keeps the test.
    ///
    /// # Errors
    /// Returns error on invalid input, unknown project, unavailable project
    /// directory or store failure
    pub async fn create_test(
        &self,
        project_id: ProjectId,
        request: CreateTestRequest,
    ) -> Result<CreateOutcome, ServiceError> {
        request.validate().map_err(ServiceError::Validation)?;
        let project = self.project(project_id).await?;

        let CreateTestRequest {
            name,
            description,
            test_parameters,
            integrations,
            scan_location,
            source,
            results_test_id,
            scheduling,
            run_test,
        } = request;

        let scan_location =
            scan_location.unwrap_or_else(|| self.config.default_channel_alias.clone());
        let mut draft = NewTest::new(project.id, project.name, name, scan_location)
            .with_parameters(test_parameters)
            .with_integrations(integrations)
            .with_source(source);
        draft.description = description;
        draft.results_test_id = results_test_id;

        let mut test = self.store.insert_test(draft).await?;
        if let Err(e) = self.complete_creation(&mut test, &scheduling).await {
            tracing::warn!(
                project_id = project_id.0,
                test_id = test.id.0,
                "test creation failed, discarding the test: {}",
                e
            );
            self.discard(&mut test).await;
            return Err(e);
        }

        tracing::info!(
            project_id = project_id.0,
            test_id = test.id.0,
            test_uid = %test.test_uid,
            schedules = test.schedules.len(),
            "security test created"
        );

        if run_test {
            let run = match self.run_test(&test).await {
                Ok(run) => run,
                Err(e) => RunResponse {
                    ok: false,
                    code: e.status_code(),
                    result: None,
                    error: Some(e.to_string()),
                },
            };
            return Ok(CreateOutcome::Ran { test, run });
        }
        Ok(CreateOutcome::Created(test))
    }

    async fn complete_creation(
        &self,
        test: &mut SecurityTest,
        scheduling: &[ScheduleSpec],
    ) -> Result<(), ServiceError> {
        test.change_schedules(&self.reconciler, scheduling).await?;
        self.store
            .insert_threshold(SecurityThreshold::for_test(test))
            .await?;
        Ok(())
    }

    /// Undo a partial creation: drop the schedules it created, then the row
    async fn discard(&self, test: &mut SecurityTest) {
        if let Err(e) = test.change_schedules(&self.reconciler, &[]).await {
            tracing::warn!(test_id = test.id.0, "cannot persist emptied schedules: {}", e);
        }
        if let Err(e) = self.store.delete_tests(test.project_id, &[test.id]).await {
            tracing::error!(test_id = test.id.0, "cannot remove partially created test: {}", e);
        }
    }

    /// Delete tests by a comma-separated id list
    ///
    /// All tests are loaded first. Then, one test at a time, its schedules
    /// are reconciled away and its row is removed. Ids that match no test of
    /// the project are ignored. Returns the requested ids.
    ///
    /// # Errors
    /// Returns error if an id is not an integer, the project is unknown or
    /// the store fails. Nothing is touched when parsing, the project lookup
    /// or loading fails. When the store fails mid-way, the tests before the
    /// failing one are fully deleted, the ones after it are untouched, and
    /// the failing one keeps its row but may have lost its schedules.
    pub async fn delete_tests(
        &self,
        project_id: ProjectId,
        raw_ids: &str,
    ) -> Result<Vec<TestId>, ServiceError> {
        let ids = parse_ids(raw_ids)?;
        let project = self.project(project_id).await?;

        let mut doomed = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(test) = self.store.get_test(project.id, &TestKey::Id(*id)).await? {
                doomed.push(test);
            }
        }

        let mut removed = 0;
        for mut test in doomed {
            test.change_schedules(&self.reconciler, &[]).await?;
            removed += self.store.delete_tests(project.id, &[test.id]).await?.len();
        }

        tracing::info!(
            project_id = project.id.0,
            requested = ids.len(),
            removed,
            "security tests deleted"
        );
        Ok(ids)
    }

    /// Replace a test's schedules
    ///
    /// # Errors
    /// Returns error if the test does not exist or the store fails
    pub async fn update_schedules(
        &self,
        project_id: ProjectId,
        key: &TestKey,
        desired: &[ScheduleSpec],
    ) -> Result<ReconcileReport, ServiceError> {
        let mut test = self.get_test(project_id, key).await?;
        Ok(test.change_schedules(&self.reconciler, desired).await?)
    }

    /// Build a stored test's execution document with its stored thresholds
    ///
    /// # Errors
    /// Returns error if the test does not exist, the store fails or the
    /// document cannot be built
    pub async fn execution_config(
        &self,
        project_id: ProjectId,
        key: &TestKey,
        mode: OutputMode,
        kind: JobKind,
    ) -> Result<ExecutionDocument, ServiceError> {
        let test = self.get_test(project_id, key).await?;
        let thresholds = self
            .store
            .get_threshold(project_id, &test.test_uid)
            .await?
            .map_or_else(Thresholds::unset, |t| t.levels);

        Ok(test
            .execution_config(&self.assembler, mode, kind, &thresholds)
            .await?)
    }

    /// Dispatch a test as a container job
    ///
    /// Dispatch failures are reported in the response, not as errors.
    ///
    /// # Errors
    /// Returns error if the container descriptor cannot be built
    pub async fn run_test(&self, test: &SecurityTest) -> Result<RunResponse, ServiceError> {
        let descriptor = self
            .assembler
            .build_container(test, self.config.job_kind)
            .await?;
        let payload = serde_json::to_value(&descriptor).map_err(BuildError::from)?;

        let response = match self
            .bus
            .call(names::RUN_TASK, self.config.timeouts.run(), payload)
            .await
        {
            Ok(result) => {
                tracing::info!(test_id = test.id.0, "security test dispatched");
                RunResponse {
                    ok: true,
                    code: 200,
                    result: Some(result),
                    error: None,
                }
            }
            Err(e) => {
                let code = if e.is_absent() { 503 } else { 500 };
                tracing::error!(test_id = test.id.0, code, "security test dispatch failed: {}", e);
                RunResponse {
                    ok: false,
                    code,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(response)
    }

    /// Websocket URL of a task run's live logs
    ///
    /// # Errors
    /// Returns [`ServiceError::LogStreamNotFound`] if either parameter is
    /// missing or empty
    pub fn log_stream_url(
        &self,
        project_id: ProjectId,
        task_id: Option<&str>,
        result_test_id: Option<&str>,
    ) -> Result<String, ServiceError> {
        match (task_id, result_test_id) {
            (Some(task), Some(result)) if !task.is_empty() && !result.is_empty() => Ok(
                logs::log_stream_url(&self.config.loki_url, project_id, task, result),
            ),
            _ => Err(ServiceError::LogStreamNotFound),
        }
    }

    async fn project(&self, project_id: ProjectId) -> Result<Project, ServiceError> {
        match self
            .bus
            .call_typed::<_, Project>(
                names::PROJECT_GET_OR_404,
                self.config.timeouts.project_lookup(),
                &json!({ "project_id": project_id }),
            )
            .await
        {
            Ok(project) => Ok(project),
            Err(e) if e.is_absent() => Err(ServiceError::Unavailable(e)),
            Err(e) => {
                tracing::debug!(project_id = project_id.0, "project lookup failed: {}", e);
                Err(ServiceError::ProjectNotFound(project_id))
            }
        }
    }
}

impl std::fmt::Debug for TestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestService")
            .field("reconciler", &self.reconciler)
            .field("assembler", &self.assembler)
            .finish_non_exhaustive()
    }
}

/// Parse a comma-separated list of test ids
///
/// # Errors
/// Returns [`ServiceError::InvalidInput`] if any entry is not an integer
pub fn parse_ids(raw: &str) -> Result<Vec<TestId>, ServiceError> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map(TestId)
                .map_err(|_| ServiceError::InvalidInput("IDs must be integers".to_string()))
        })
        .collect()
}
