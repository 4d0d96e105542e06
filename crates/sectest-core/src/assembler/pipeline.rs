//! Declarative pipeline manifest
//!
//! The manifest consumed by the scanning pipeline runner. One suite per job
//! kind, with scanners, processors and reporters each given as fragments.

use crate::fragments::{FragmentMap, ResolvedFragments};
use crate::types::{JobKind, SecurityTest, Thresholds};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Manifest schema version understood by the pipeline runner
pub const CONFIG_VERSION: u32 = 2;

/// Processing entry carrying the quality gate
pub const QUALITY_GATE_KEY: &str = "quality_gate";

/// Reporter entry shipping logs to the log service
pub const LOG_SINK_KEY: &str = "centry_loki";

/// Reporter entry posting run status
pub const STATUS_CALLBACK_KEY: &str = "centry_status";

/// Reporter entry submitting results
pub const RESULT_SUBMISSION_KEY: &str = "centry";

/// Pipeline manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineManifest {
    /// Schema version
    pub config_version: u32,
    /// Suites keyed by job kind
    pub suites: BTreeMap<String, Suite>,
}

/// One suite of the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    /// Suite metadata
    pub settings: SuiteSettings,
    /// Scanner fragments keyed by job kind
    pub scanners: BTreeMap<String, FragmentMap>,
    /// Processor fragments
    pub processing: FragmentMap,
    /// Reporter fragments
    pub reporters: FragmentMap,
}

/// Suite metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSettings {
    /// Owning project name
    pub project_name: String,
    /// Test name
    pub project_description: String,
    /// Always `target`
    pub environment_name: String,
    /// Uppercase job kind
    pub testing_type: String,
    /// Always `full`
    pub scan_type: String,
    /// Test uid
    pub build_id: String,
    /// Scanner limits keyed by job kind
    #[serde(flatten)]
    pub limits: BTreeMap<String, ScannerLimits>,
}

/// Per-kind scanner limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerLimits {
    /// Scanners allowed to run at once
    pub max_concurrent_scanners: u32,
}

/// Endpoint and token of the results service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsEndpoint {
    /// Results service URL
    pub url: String,
    /// Auth token
    pub token: String,
}

/// Canonical form of a threshold key: first letter upper, rest lower
///
/// ```
/// use sectest_core::assembler::pipeline::canonical_threshold_key;
/// assert_eq!(canonical_threshold_key("critical_life"), "Critical_life");
/// ```
#[must_use]
pub fn canonical_threshold_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Quality gate entry: only enforced thresholds, canonical keys
#[must_use]
pub fn quality_gate(thresholds: &Thresholds) -> Value {
    let enforced: serde_json::Map<String, Value> = thresholds
        .enforced()
        .map(|(key, value)| (canonical_threshold_key(key), json!(value)))
        .collect();
    json!({ "thresholds": enforced })
}

/// Write the fixed reporter entries, overriding any plugin output
pub fn inject_infrastructure(
    reporters: &mut FragmentMap,
    test: &SecurityTest,
    loki_url: &str,
    results: &ResultsEndpoint,
) {
    let results_test_id = test.results_test_label();

    reporters.insert(
        LOG_SINK_KEY.to_string(),
        json!({
            "url": loki_url,
            "labels": {
                "project_id": test.project_id.to_string(),
                "task_key": test.id.to_string(),
                "result_test_id": results_test_id,
            },
        }),
    );

    let results_entry = json!({
        "url": results.url,
        "token": results.token,
        "project_id": test.project_id.to_string(),
        "test_id": results_test_id,
    });
    reporters.insert(STATUS_CALLBACK_KEY.to_string(), results_entry.clone());
    reporters.insert(RESULT_SUBMISSION_KEY.to_string(), results_entry);
}

/// Assemble the manifest from resolved fragments
#[must_use]
pub fn assemble(
    test: &SecurityTest,
    kind: JobKind,
    fragments: ResolvedFragments,
    thresholds: &Thresholds,
    loki_url: &str,
    results: &ResultsEndpoint,
) -> PipelineManifest {
    let ResolvedFragments {
        scanners,
        mut processing,
        mut reporters,
    } = fragments;

    processing.insert(QUALITY_GATE_KEY.to_string(), quality_gate(thresholds));
    inject_infrastructure(&mut reporters, test, loki_url, results);

    let settings = SuiteSettings {
        project_name: test.project_name.clone(),
        project_description: test.name.clone(),
        environment_name: "target".to_string(),
        testing_type: kind.testing_type().to_string(),
        scan_type: "full".to_string(),
        build_id: test.test_uid.clone(),
        limits: BTreeMap::from([(
            kind.as_str().to_string(),
            ScannerLimits {
                max_concurrent_scanners: 1,
            },
        )]),
    };

    let suite = Suite {
        settings,
        scanners: BTreeMap::from([(kind.as_str().to_string(), scanners)]),
        processing,
        reporters,
    };

    PipelineManifest {
        config_version: CONFIG_VERSION,
        suites: BTreeMap::from([(kind.as_str().to_string(), suite)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewTest, ProjectId, TestId};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn endpoint() -> ResultsEndpoint {
        ResultsEndpoint {
            url: "https://results".to_string(),
            token: "t0k3n".to_string(),
        }
    }

    fn sample_test() -> SecurityTest {
        NewTest::new(ProjectId(3), "acme", "nightly", "default")
            .with_results_test_id(41)
            .into_test(TestId(12))
    }

    #[test]
    fn canonical_keys() {
        assert_eq!(canonical_threshold_key("critical"), "Critical");
        assert_eq!(canonical_threshold_key("HIGH"), "High");
        assert_eq!(canonical_threshold_key("info_life"), "Info_life");
        assert_eq!(canonical_threshold_key(""), "");
    }

    #[test]
    fn all_unset_gives_empty_gate() {
        assert_eq!(quality_gate(&Thresholds::unset()), json!({ "thresholds": {} }));
    }

    #[test]
    fn zero_threshold_is_enforced() {
        let gate = quality_gate(&Thresholds::unset().with("critical", 0).with("low_life", 12));
        assert_eq!(gate, json!({ "thresholds": { "Critical": 0, "Low_life": 12 } }));
    }

    #[test]
    fn fixed_reporters_override_plugins() {
        let mut reporters = FragmentMap::new();
        reporters.insert(LOG_SINK_KEY.to_string(), json!("plugin"));
        reporters.insert("jira".to_string(), json!({ "project": "SEC" }));

        inject_infrastructure(&mut reporters, &sample_test(), "http://loki/push", &endpoint());

        assert_eq!(reporters.len(), 4);
        assert_eq!(
            reporters[LOG_SINK_KEY],
            json!({
                "url": "http://loki/push",
                "labels": { "project_id": "3", "task_key": "12", "result_test_id": "41" }
            })
        );
        assert_eq!(
            reporters[STATUS_CALLBACK_KEY],
            json!({ "url": "https://results", "token": "t0k3n", "project_id": "3", "test_id": "41" })
        );
        assert_eq!(reporters[RESULT_SUBMISSION_KEY], reporters[STATUS_CALLBACK_KEY]);
    }

    #[test]
    fn manifest_shape() {
        let test = sample_test();
        let manifest = assemble(
            &test,
            JobKind::Dast,
            ResolvedFragments::default(),
            &Thresholds::unset(),
            "http://loki/push",
            &endpoint(),
        );
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["config_version"], json!(2));
        let suite = &value["suites"]["dast"];
        assert_eq!(
            suite["settings"],
            json!({
                "project_name": "acme",
                "project_description": "nightly",
                "environment_name": "target",
                "testing_type": "DAST",
                "scan_type": "full",
                "build_id": test.test_uid,
                "dast": { "max_concurrent_scanners": 1 }
            })
        );
        assert_eq!(suite["scanners"], json!({ "dast": {} }));
        assert_eq!(suite["processing"], json!({ "quality_gate": { "thresholds": {} } }));
    }

    proptest! {
        #[test]
        fn gate_holds_exactly_enforced_levels(values in proptest::collection::vec(-1i64..50, 10)) {
            let mut thresholds = Thresholds::unset();
            for ((key, _), value) in Thresholds::unset().entries().iter().zip(&values) {
                thresholds.set(key, *value);
            }

            let gate = quality_gate(&thresholds);
            let body = gate["thresholds"].as_object().unwrap();

            let expected = values.iter().filter(|v| **v > -1).count();
            prop_assert_eq!(body.len(), expected);
            for (key, value) in thresholds.entries() {
                let canonical = canonical_threshold_key(key);
                if value > -1 {
                    prop_assert_eq!(body.get(&canonical), Some(&json!(value)));
                } else {
                    prop_assert!(!body.contains_key(&canonical));
                }
            }
        }
    }
}
