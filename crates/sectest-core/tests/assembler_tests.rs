use pretty_assertions::assert_eq;
use sectest_bus::CapabilityBus;
use sectest_core::assembler::container::ExecutionParams;
use sectest_core::assembler::pipeline::{LOG_SINK_KEY, RESULT_SUBMISSION_KEY, STATUS_CALLBACK_KEY};
use sectest_core::{
    Category, ExecutionAssembler, ExecutionDocument, Integrations, JobKind, OutputMode,
    ServiceConfig, Thresholds,
};
use sectest_test_utils::{fixture_draft, fixture_secrets, register_fragment, AUTH_TOKEN, RESULTS_URL};
use serde_json::json;
use std::sync::Arc;

fn assembler(bus: &CapabilityBus) -> ExecutionAssembler {
    ExecutionAssembler::new(bus.clone(), Arc::new(fixture_secrets()), ServiceConfig::default())
}

#[tokio::test]
async fn pipeline_keeps_only_resolvable_fragments() {
    let bus = CapabilityBus::new();
    register_fragment(&bus, Category::Scanners, "semgrep", "semgrep", json!({ "ruleset": "p/ci" }));
    register_fragment(&bus, Category::Reporters, "jira", "jira", json!({ "project": "SEC" }));

    let test = fixture_draft(3, "nightly")
        .with_integrations(
            Integrations::new()
                .with(Category::Scanners, "semgrep", json!({}))
                .with(Category::Scanners, "unknown-scanner", json!({}))
                .with(Category::Processing, "false_positive", json!({}))
                .with(Category::Reporters, "jira", json!({}))
                .with(Category::Reporters, "email", json!({})),
        )
        .with_results_test_id(88)
        .into_test(sectest_core::TestId(5));

    let manifest = assembler(&bus)
        .build_pipeline(&test, JobKind::Sast, &Thresholds::unset())
        .await
        .unwrap();
    let suite = &manifest.suites["sast"];

    assert_eq!(
        suite.scanners["sast"].keys().collect::<Vec<_>>(),
        vec!["semgrep"]
    );
    assert_eq!(
        suite.processing.keys().collect::<Vec<_>>(),
        vec!["quality_gate"]
    );

    let mut reporters: Vec<_> = suite.reporters.keys().cloned().collect();
    reporters.sort();
    assert_eq!(
        reporters,
        vec![
            RESULT_SUBMISSION_KEY.to_string(),
            LOG_SINK_KEY.to_string(),
            STATUS_CALLBACK_KEY.to_string(),
            "jira".to_string(),
        ]
    );
    assert_eq!(
        suite.reporters[STATUS_CALLBACK_KEY],
        json!({ "url": RESULTS_URL, "token": AUTH_TOKEN, "project_id": "3", "test_id": "88" })
    );
    assert_eq!(
        suite.reporters[LOG_SINK_KEY]["labels"],
        json!({ "project_id": "3", "task_key": "5", "result_test_id": "88" })
    );
}

#[tokio::test]
async fn pipeline_quality_gate_holds_enforced_thresholds() {
    let bus = CapabilityBus::new();
    let test = fixture_draft(1, "gate").into_test(sectest_core::TestId(1));
    let thresholds = Thresholds::unset().with("critical", 0).with("high_life", 5);

    let document = assembler(&bus)
        .build(&test, OutputMode::Pipeline, JobKind::Dast, &thresholds)
        .await
        .unwrap();
    let value = serde_json::to_value(&document).unwrap();

    assert_eq!(
        value["suites"]["dast"]["processing"]["quality_gate"],
        json!({ "thresholds": { "Critical": 0, "High_life": 5 } })
    );
    assert_eq!(value["suites"]["dast"]["settings"]["testing_type"], json!("DAST"));
}

#[tokio::test]
async fn container_descriptor_for_default_channel() {
    let bus = CapabilityBus::new();
    let test = fixture_draft(4, "nightly")
        .with_integrations(Integrations::new().with(Category::Reporters, "quality", json!({})))
        .into_test(sectest_core::TestId(2));

    let ExecutionDocument::Container(descriptor) = assembler(&bus)
        .build(&test, OutputMode::Container, JobKind::Sast, &Thresholds::unset())
        .await
        .unwrap()
    else {
        panic!("expected a container descriptor");
    };

    assert_eq!(descriptor.channel, "default");
    assert_eq!(descriptor.container, "getcarrier/sast:latest");
    assert_eq!(descriptor.quality_gate.as_deref(), Some("true"));
    assert_eq!(descriptor.cc_env_vars["RABBIT_HOST"], "rabbitmq");
    assert_eq!(descriptor.cc_env_vars["RABBIT_PASSWORD"], "guest-pass");

    let params: ExecutionParams = serde_json::from_str(&descriptor.execution_params).unwrap();
    assert_eq!(params.cmd, format!("run -b centry:sast_{} -s sast", test.test_uid));
    assert_eq!(params.galloper_url, RESULTS_URL);
    assert_eq!(params.galloper_project_id, "4");
}

#[tokio::test]
async fn container_descriptor_keeps_custom_channel() {
    let bus = CapabilityBus::new();
    let mut test = fixture_draft(4, "nightly").into_test(sectest_core::TestId(2));
    test.scan_location = "eu-runners".to_string();

    let descriptor = assembler(&bus)
        .build_container(&test, JobKind::Dast)
        .await
        .unwrap();

    assert_eq!(descriptor.channel, "eu-runners");
    assert_eq!(descriptor.job_type, "dast");
    assert!(descriptor.quality_gate.is_none());
}

#[tokio::test]
async fn docker_document_is_a_command_line() {
    let bus = CapabilityBus::new();
    let test = fixture_draft(2, "manual").into_test(sectest_core::TestId(9));

    let document = assembler(&bus)
        .build(&test, OutputMode::Docker, JobKind::Sast, &Thresholds::unset())
        .await
        .unwrap();
    let value = serde_json::to_value(&document).unwrap();

    let command = value.as_str().unwrap();
    assert!(command.starts_with("docker run --rm -i -t -e project_id=2 "));
    assert!(command.ends_with(&format!("-tid {}", test.test_uid)));
}
