//! Webhook → reconcile → gate refresh, through the public API.

mod common;

use common::{Pipeline, sample_snapshot, single_result};
use pretty_assertions::assert_eq;
use qtrack::events::QualityEvent;
use qtrack::junit_xml::{MatchKind, extract_test_result};
use qtrack::model::{GateStatus, ParsingSource, TestStatus};
use qtrack::store::{QualityStore, Snapshot};
use serde_json::json;
use std::thread;

const E2E_REPORT: &str = "<testsuite><testcase name=\"TC1\" classname=\"tests.t.C\" time=\"0.5\"><failure type=\"AssertionError\" message=\"x\">stack</failure></testcase></testsuite>";

#[test]
fn failed_result_with_junit_report_is_enriched_and_reconciled() {
    let pipeline = Pipeline::new(Snapshot::default());
    let response = pipeline.handler.handle(&json!({
        "requestId": "r1",
        "results": [{
            "id": "TC1",
            "status": "Failed",
            "junitXml": { "available": true, "content": E2E_REPORT }
        }]
    }));

    assert_eq!(response.status, 200, "{}", response.body);
    assert_eq!(response.body["enhanced"], json!(true));
    assert_eq!(response.body["logsExtracted"], json!(true));
    assert_eq!(response.body["parsingSource"], json!("junit-xml"));
    assert_eq!(response.body["change"], json!("created"));

    let record = pipeline
        .store
        .get_test_case("TC1")
        .expect("get")
        .expect("record created");
    assert_eq!(record.status, TestStatus::Failed);
    assert_eq!(record.execution_time, 500);
    assert!(record.logs.contains("FAILURE:\nstack"), "{}", record.logs);
    assert!(record.last_executed.is_some());

    let stored = pipeline.handler.get_results_for_request("r1");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].file.as_deref(), Some("t.py"));
    assert_eq!(stored[0].framework.as_deref(), Some("pytest"));
    let failure = stored[0].failure.as_ref().expect("failure info");
    assert_eq!(failure.kind, "AssertionError");
    assert_eq!(failure.message, "x");
}

#[test]
fn stored_result_is_listed_exactly_once() {
    let pipeline = Pipeline::new(Snapshot::default());
    for _ in 0..3 {
        let response = pipeline.handler.handle(&single_result(
            "r2",
            json!({ "id": "TC9", "status": "Passed", "duration": 40 }),
        ));
        assert!(response.is_success());
    }
    pipeline
        .handler
        .handle(&single_result("other", json!({ "id": "TC9", "status": "Failed" })));

    let results = pipeline.handler.get_results_for_request("r2");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id(), "TC9");
    assert_eq!(results[0].parsing_source, ParsingSource::None);
    assert_eq!(pipeline.handler.get_results_for_request("other").len(), 1);
}

#[test]
fn duplicate_delivery_reports_unchanged() {
    let pipeline = Pipeline::new(sample_snapshot());
    let rx = pipeline.events.subscribe();
    let payload = single_result("r3", json!({ "id": "TC2", "status": "Failed" }));

    let first = pipeline.handler.handle(&payload);
    let second = pipeline.handler.handle(&payload);
    assert_eq!(first.body["change"], json!("updated"));
    assert_eq!(second.body["change"], json!("unchanged"));
    assert_eq!(second.body["reconciled"], json!(true));

    let names: Vec<&'static str> = rx.try_iter().map(|event| event.event_name()).collect();
    assert_eq!(
        names,
        vec![
            "webhook_received",
            "test_case_updated",
            "versions_updated",
            "webhook_received",
        ]
    );
}

#[test]
fn committed_change_refreshes_release_gates() {
    let pipeline = Pipeline::new(sample_snapshot());
    let before = pipeline.store.get_versions().expect("versions");
    assert!(
        before[0]
            .quality_gates
            .iter()
            .all(|gate| gate.status == GateStatus::Pending)
    );

    pipeline
        .handler
        .handle(&single_result("r4", json!({ "id": "TC2", "status": "Failed" })));

    let after = pipeline.store.get_versions().expect("versions");
    let v1 = &after[0].quality_gates;
    assert_eq!(v1[0].id, "test-pass-rate");
    assert!((v1[0].actual - 67.0).abs() < f64::EPSILON);
    assert_eq!(v1[0].status, GateStatus::Failed);
    assert_eq!(v1[1].status, GateStatus::Passed);

    let v2 = &after[1].quality_gates;
    assert!(v2[0].is_inverted);
    assert!((v2[0].actual - 0.5).abs() < 1e-9);
    assert_eq!(v2[0].status, GateStatus::Failed);
}

#[test]
fn preserved_fields_survive_status_updates() {
    let pipeline = Pipeline::new(sample_snapshot());
    pipeline.handler.handle(&single_result(
        "r5",
        json!({ "id": "TC1", "name": "Renamed upstream", "status": "Failed", "logs": "boom" }),
    ));

    let record = pipeline
        .store
        .get_test_case("TC1")
        .expect("get")
        .expect("record");
    assert_eq!(record.name, "Valid login");
    assert_eq!(record.requirement_ids, vec!["REQ-1".to_string()]);
    assert_eq!(record.logs, "boom");
    assert_eq!(record.status, TestStatus::Failed);
}

#[test]
fn parallel_deliveries_keep_one_record_per_id() {
    let pipeline = Pipeline::new(Snapshot::default());
    let ids = ["TC-A", "TC-B", "TC-C", "TC-D"];

    thread::scope(|scope| {
        for worker in 0..8 {
            let handler = &pipeline.handler;
            scope.spawn(move || {
                for round in 0..10 {
                    let id = ids[(worker + round) % ids.len()];
                    let status = if (worker + round) % 3 == 0 {
                        "Failed"
                    } else {
                        "Passed"
                    };
                    let response = handler.handle(&single_result(
                        "parallel",
                        json!({ "id": id, "status": status }),
                    ));
                    assert!(response.is_success(), "{}", response.body);
                }
            });
        }
    });

    let mut stored: Vec<String> = pipeline
        .store
        .get_test_cases()
        .expect("list")
        .into_iter()
        .map(|tc| tc.id)
        .collect();
    stored.sort();
    assert_eq!(stored, ids.map(str::to_string).to_vec());
    assert_eq!(pipeline.handler.get_results_for_request("parallel").len(), 4);
    assert_eq!(pipeline.handler.reconciler().active_locks(), 0);
}

#[test]
fn created_events_carry_the_new_record() {
    let pipeline = Pipeline::new(Snapshot::default());
    let rx = pipeline.events.subscribe();
    pipeline
        .handler
        .handle(&single_result("r6", json!({ "id": "TC-new", "status": "Skipped" })));

    let created = rx
        .try_iter()
        .find_map(|event| match event {
            QualityEvent::TestCaseCreated { record } => Some(record),
            _ => None,
        })
        .expect("created event");
    assert_eq!(created.id, "TC-new");
    assert_eq!(created.name, "Test case TC-new");
    assert_eq!(created.last_executed, None);
}

#[test]
fn login_report_resolution() {
    let xml = r#"<testsuite>
  <testcase classname="tests.test_login.TestLogin" name="test_valid_credentials" time="0.2"/>
</testsuite>"#;

    let exact = extract_test_result(xml, "test_valid_credentials", 1024)
        .expect("parse")
        .expect("match");
    assert_eq!(exact.matched_by, MatchKind::Exact);
    assert_eq!(exact.status, TestStatus::Passed);
    assert_eq!(exact.file, "test_login.py");

    assert_eq!(extract_test_result(xml, "TC_LOGIN_01", 1024).expect("parse"), None);
}
