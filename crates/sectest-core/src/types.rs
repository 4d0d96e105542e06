//! Core types for security tests
//!
//! Defines the data owned by the test aggregate:
//! - identifiers (tests, projects, schedules)
//! - job kinds and integration categories
//! - the `SecurityTest` record and its creation draft
//! - severity thresholds and schedule specifications

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// System-assigned test identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(pub i64);

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning project identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a schedule held by the scheduling subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub i64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Test family a job is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Static analysis
    #[default]
    Sast,
    /// Dynamic analysis
    Dast,
}

impl JobKind {
    /// Lowercase identifier (`sast` / `dast`)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Sast => "sast",
            JobKind::Dast => "dast",
        }
    }

    /// Uppercase testing type label (`SAST` / `DAST`)
    #[inline]
    #[must_use]
    pub fn testing_type(&self) -> &'static str {
        match self {
            JobKind::Sast => "SAST",
            JobKind::Dast => "DAST",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sast" => Ok(JobKind::Sast),
            "dast" => Ok(JobKind::Dast),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Integration category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Scanners producing findings
    Scanners,
    /// Post-processors applied to findings
    Processing,
    /// Reporters shipping results out
    Reporters,
}

impl Category {
    /// Key used in the integrations map and in capability names
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Scanners => "scanners",
            Category::Processing => "processing",
            Category::Reporters => "reporters",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of one category: integration name → free-form settings
pub type CategorySettings = BTreeMap<String, Value>;

static EMPTY_CATEGORY: CategorySettings = BTreeMap::new();

/// Integrations selected for a test, keyed by category
///
/// Parsing is lenient: a non-object root or a non-object category value
/// yields "no integrations" for that part instead of an error. Unknown
/// categories are kept so they survive a round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Integrations {
    categories: BTreeMap<String, CategorySettings>,
}

impl Integrations {
    /// Create empty integration selection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary JSON value
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(root) = value.as_object() else {
            return Self::new();
        };

        let categories = root
            .iter()
            .map(|(category, entries)| {
                let settings = entries
                    .as_object()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                (category.clone(), settings)
            })
            .collect();

        Self { categories }
    }

    /// With an integration added
    #[inline]
    #[must_use]
    pub fn with(mut self, category: Category, name: impl Into<String>, settings: Value) -> Self {
        self.insert(category, name, settings);
        self
    }

    /// Add or replace an integration
    pub fn insert(&mut self, category: Category, name: impl Into<String>, settings: Value) {
        self.categories
            .entry(category.as_str().to_string())
            .or_default()
            .insert(name.into(), settings);
    }

    /// Settings of one category, empty if none configured
    #[must_use]
    pub fn category(&self, category: Category) -> &CategorySettings {
        self.categories
            .get(category.as_str())
            .unwrap_or(&EMPTY_CATEGORY)
    }

    /// Integration names configured in a category
    #[must_use]
    pub fn names(&self, category: Category) -> Vec<&str> {
        self.category(category).keys().map(String::as_str).collect()
    }

    /// Check if an integration is configured
    #[inline]
    #[must_use]
    pub fn contains(&self, category: Category, name: &str) -> bool {
        self.category(category).contains_key(name)
    }

    /// Check if nothing is configured in any category
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.values().all(BTreeMap::is_empty)
    }
}

impl From<Value> for Integrations {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl Serialize for Integrations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.categories.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Integrations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// A configured security scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityTest {
    /// System-assigned id
    pub id: TestId,
    /// Owning project
    pub project_id: ProjectId,
    /// Owning project display name
    pub project_name: String,
    /// Globally unique, immutable uid
    pub test_uid: String,
    /// Test name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form parameter objects, in order
    #[serde(default)]
    pub test_parameters: Vec<Value>,
    /// Selected integrations per category
    #[serde(default)]
    pub integrations: Integrations,
    /// Schedules attached to this test
    #[serde(default)]
    pub schedules: BTreeSet<ScheduleId>,
    /// Id under which produced results are recorded
    #[serde(default)]
    pub results_test_id: Option<i64>,
    /// Scan location / execution channel label
    pub scan_location: String,
    /// What is scanned (repository, archive, target URLs...)
    #[serde(default)]
    pub source: Value,
}

impl SecurityTest {
    /// Names of configured scanners
    #[must_use]
    pub fn scanners(&self) -> Vec<&str> {
        self.integrations.names(Category::Scanners)
    }

    /// Results test id rendered for downstream labels (`"None"` when unset)
    #[must_use]
    pub fn results_test_label(&self) -> String {
        self.results_test_id
            .map_or_else(|| "None".to_string(), |id| id.to_string())
    }
}

/// A test before it has been persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTest {
    /// Owning project
    pub project_id: ProjectId,
    /// Owning project display name
    pub project_name: String,
    /// Uid assigned at creation
    pub test_uid: String,
    /// Test name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Free-form parameter objects
    pub test_parameters: Vec<Value>,
    /// Selected integrations
    pub integrations: Integrations,
    /// Results linkage
    pub results_test_id: Option<i64>,
    /// Scan location label
    pub scan_location: String,
    /// What is scanned
    pub source: Value,
}

impl NewTest {
    /// Create draft with a fresh uid
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        project_name: impl Into<String>,
        name: impl Into<String>,
        scan_location: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            project_name: project_name.into(),
            test_uid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            test_parameters: Vec::new(),
            integrations: Integrations::new(),
            results_test_id: None,
            scan_location: scan_location.into(),
            source: Value::Null,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With integrations
    #[inline]
    #[must_use]
    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    /// With test parameters
    #[inline]
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.test_parameters = parameters;
        self
    }

    /// With results test id
    #[inline]
    #[must_use]
    pub fn with_results_test_id(mut self, id: i64) -> Self {
        self.results_test_id = Some(id);
        self
    }

    /// With source description
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: Value) -> Self {
        self.source = source;
        self
    }

    /// Materialize with an assigned id and no schedules
    #[must_use]
    pub fn into_test(self, id: TestId) -> SecurityTest {
        SecurityTest {
            id,
            project_id: self.project_id,
            project_name: self.project_name,
            test_uid: self.test_uid,
            name: self.name,
            description: self.description,
            test_parameters: self.test_parameters,
            integrations: self.integrations,
            schedules: BTreeSet::new(),
            results_test_id: self.results_test_id,
            scan_location: self.scan_location,
            source: self.source,
        }
    }
}

/// How a caller addresses a test: numeric id or uid
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TestKey {
    /// By system id
    Id(TestId),
    /// By uid
    Uid(String),
}

impl TestKey {
    /// Parse a path segment: integers address ids, anything else uids
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| TestKey::Uid(raw.to_string()), |id| TestKey::Id(TestId(id)))
    }

    /// Check if key addresses the given test
    #[must_use]
    pub fn matches(&self, test: &SecurityTest) -> bool {
        match self {
            TestKey::Id(id) => test.id == *id,
            TestKey::Uid(uid) => test.test_uid == *uid,
        }
    }
}

impl From<TestId> for TestKey {
    fn from(id: TestId) -> Self {
        TestKey::Id(id)
    }
}

impl fmt::Display for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKey::Id(id) => write!(f, "{id}"),
            TestKey::Uid(uid) => f.write_str(uid),
        }
    }
}

/// Threshold value meaning "not enforced"
pub const UNSET_THRESHOLD: i64 = -1;

/// Severity thresholds of a quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Critical findings
    pub critical: i64,
    /// High findings
    pub high: i64,
    /// Medium findings
    pub medium: i64,
    /// Low findings
    pub low: i64,
    /// Informational findings
    pub info: i64,
    /// Critical findings over the test lifetime
    pub critical_life: i64,
    /// High findings over the test lifetime
    pub high_life: i64,
    /// Medium findings over the test lifetime
    pub medium_life: i64,
    /// Low findings over the test lifetime
    pub low_life: i64,
    /// Informational findings over the test lifetime
    pub info_life: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical: UNSET_THRESHOLD,
            high: UNSET_THRESHOLD,
            medium: UNSET_THRESHOLD,
            low: UNSET_THRESHOLD,
            info: UNSET_THRESHOLD,
            critical_life: UNSET_THRESHOLD,
            high_life: UNSET_THRESHOLD,
            medium_life: UNSET_THRESHOLD,
            low_life: UNSET_THRESHOLD,
            info_life: UNSET_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// All thresholds unset
    #[inline]
    #[must_use]
    pub fn unset() -> Self {
        Self::default()
    }

    /// All levels as `(key, value)` pairs
    #[must_use]
    pub fn entries(&self) -> [(&'static str, i64); 10] {
        [
            ("critical", self.critical),
            ("high", self.high),
            ("medium", self.medium),
            ("low", self.low),
            ("info", self.info),
            ("critical_life", self.critical_life),
            ("high_life", self.high_life),
            ("medium_life", self.medium_life),
            ("low_life", self.low_life),
            ("info_life", self.info_life),
        ]
    }

    /// Set one level by key, returns `false` for unknown keys
    pub fn set(&mut self, key: &str, value: i64) -> bool {
        let slot = match key {
            "critical" => &mut self.critical,
            "high" => &mut self.high,
            "medium" => &mut self.medium,
            "low" => &mut self.low,
            "info" => &mut self.info,
            "critical_life" => &mut self.critical_life,
            "high_life" => &mut self.high_life,
            "medium_life" => &mut self.medium_life,
            "low_life" => &mut self.low_life,
            "info_life" => &mut self.info_life,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// With one level set
    #[must_use]
    pub fn with(mut self, key: &str, value: i64) -> Self {
        self.set(key, value);
        self
    }

    /// Levels that are enforced (`> -1`)
    pub fn enforced(&self) -> impl Iterator<Item = (&'static str, i64)> {
        self.entries()
            .into_iter()
            .filter(|(_, value)| *value > UNSET_THRESHOLD)
    }
}

/// Threshold record paired one-to-one with a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityThreshold {
    /// Owning project
    pub project_id: ProjectId,
    /// Name of the paired test
    pub test_name: String,
    /// Uid of the paired test
    pub test_uid: String,
    /// Severity levels
    #[serde(flatten)]
    pub levels: Thresholds,
}

impl SecurityThreshold {
    /// Unset thresholds for a freshly created test
    #[must_use]
    pub fn for_test(test: &SecurityTest) -> Self {
        Self {
            project_id: test.project_id,
            test_name: test.name.clone(),
            test_uid: test.test_uid.clone(),
            levels: Thresholds::unset(),
        }
    }
}

/// Desired schedule, existing (with id) or new (without)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Id of an existing schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScheduleId>,
    /// Scheduler-defined fields (cron, name, active...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ScheduleSpec {
    /// New schedule from its fields
    #[inline]
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { id: None, fields }
    }

    /// Reference to an existing schedule
    #[inline]
    #[must_use]
    pub fn existing(id: ScheduleId) -> Self {
        Self {
            id: Some(id),
            fields: Map::new(),
        }
    }

    /// Id of the schedule this spec refers to, `None` for new ones
    ///
    /// A zero id counts as "no id".
    #[inline]
    #[must_use]
    pub fn existing_id(&self) -> Option<ScheduleId> {
        self.id.filter(|id| id.0 != 0)
    }
}

/// Project record returned by the project directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project id
    pub id: ProjectId,
    /// Display name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integrations_parse_nested_maps() {
        let integrations = Integrations::from_value(&json!({
            "scanners": { "semgrep": { "severity": "high" }, "bandit": {} },
            "reporters": { "jira": { "project": "SEC" } }
        }));

        assert_eq!(integrations.names(Category::Scanners), vec!["bandit", "semgrep"]);
        assert!(integrations.category(Category::Processing).is_empty());
        assert!(integrations.contains(Category::Reporters, "jira"));
    }

    #[test]
    fn integrations_malformed_degrade_to_empty() {
        assert!(Integrations::from_value(&Value::Null).is_empty());
        assert!(Integrations::from_value(&json!(["scanners"])).is_empty());

        let partial = Integrations::from_value(&json!({
            "scanners": "semgrep",
            "processing": { "min_severity_filter": {} }
        }));
        assert!(partial.category(Category::Scanners).is_empty());
        assert_eq!(partial.names(Category::Processing), vec!["min_severity_filter"]);
    }

    #[test]
    fn integrations_deserialize_leniently() {
        let test: SecurityTest = serde_json::from_value(json!({
            "id": 1,
            "project_id": 2,
            "project_name": "demo",
            "test_uid": "uid",
            "name": "nightly",
            "integrations": 17,
            "scan_location": "Carrier default config"
        }))
        .unwrap();

        assert!(test.integrations.is_empty());
        assert!(test.schedules.is_empty());
        assert!(test.scanners().is_empty());
    }

    #[test]
    fn job_kind_labels() {
        assert_eq!(JobKind::Dast.as_str(), "dast");
        assert_eq!(JobKind::Dast.testing_type(), "DAST");
        assert_eq!("SAST".parse::<JobKind>().unwrap(), JobKind::Sast);
        assert!("iast".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_key_parse() {
        assert_eq!(TestKey::parse("12"), TestKey::Id(TestId(12)));
        assert_eq!(
            TestKey::parse("9f1c-uid"),
            TestKey::Uid("9f1c-uid".to_string())
        );
    }

    #[test]
    fn thresholds_default_unset() {
        let thresholds = Thresholds::unset();
        assert!(thresholds.entries().iter().all(|(_, v)| *v == UNSET_THRESHOLD));
        assert_eq!(thresholds.enforced().count(), 0);
    }

    #[test]
    fn thresholds_set_by_key() {
        let mut thresholds = Thresholds::unset();
        assert!(thresholds.set("high_life", 4));
        assert!(!thresholds.set("severe", 1));

        let enforced: Vec<_> = thresholds.enforced().collect();
        assert_eq!(enforced, vec![("high_life", 4)]);
    }

    #[test]
    fn schedule_spec_zero_id_is_new() {
        let spec: ScheduleSpec = serde_json::from_value(json!({ "id": 0, "cron": "* * * * *" })).unwrap();
        assert_eq!(spec.existing_id(), None);
        assert_eq!(spec.fields.get("cron"), Some(&json!("* * * * *")));

        let spec: ScheduleSpec = serde_json::from_value(json!({ "id": null })).unwrap();
        assert_eq!(spec.existing_id(), None);

        let spec: ScheduleSpec = serde_json::from_value(json!({ "id": 5 })).unwrap();
        assert_eq!(spec.existing_id(), Some(ScheduleId(5)));
    }

    #[test]
    fn new_test_assigns_unique_uids() {
        let a = NewTest::new(ProjectId(1), "p", "a", "default");
        let b = NewTest::new(ProjectId(1), "p", "b", "default");
        assert_ne!(a.test_uid, b.test_uid);

        let test = a.into_test(TestId(3));
        assert_eq!(test.id, TestId(3));
        assert!(test.schedules.is_empty());
    }
}
