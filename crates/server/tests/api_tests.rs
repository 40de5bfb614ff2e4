//! In-process tests of the operational HTTP endpoints.

mod common;

use axum::http::StatusCode;
use chrono::Utc;

use common::TestFixture;
use runloop_core::{bookkeeping::FinalizedRun, ControllerStatus, FinalizedRunStore, Phase};

#[tokio::test]
async fn test_health_reports_controller_status() {
    let fixture = TestFixture::new();
    fixture.status_tx.send_replace(ControllerStatus {
        phase: Phase::WaitingForFragments,
        run_id: Some("398348".to_string()),
        observed: 7,
        to_process: 2,
        dispatched: 5,
        ..Default::default()
    });

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["controller"]["phase"], "waiting_for_fragments");
    assert_eq!(response.body["controller"]["run_id"], "398348");
    assert_eq!(response.body["controller"]["dispatched"], 5);
}

#[tokio::test]
async fn test_health_degraded_after_failed_step() {
    let fixture = TestFixture::new();
    fixture.status_tx.send_replace(ControllerStatus {
        last_error: Some("fragment source error: listing timed out".to_string()),
        ..Default::default()
    });

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "degraded");
    assert_eq!(
        response.body["controller"]["last_error"],
        "fragment source error: listing timed out"
    );
}

#[tokio::test]
async fn test_config_endpoint() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["controller"]["minimum_batch"], 4);
    assert_eq!(response.body["probe"]["backend"], "directory");
}

#[tokio::test]
async fn test_list_finalized_runs() {
    let fixture = TestFixture::new();
    for run_id in ["398400", "398348"] {
        fixture
            .finalized
            .mark_finalized(&FinalizedRun {
                run_id: run_id.to_string(),
                finalized_at: Utc::now(),
                dispatched_count: 12,
            })
            .unwrap();
    }

    let response = fixture.get("/api/v1/runs/finalized").await;
    assert_eq!(response.status, StatusCode::OK);
    let runs = response.body.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["run_id"], "398348");
    assert_eq!(runs[1]["dispatched_count"], 12);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture.status_tx.send_replace(ControllerStatus {
        to_process: 3,
        ..Default::default()
    });

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("# TYPE runloop_run_fragments_pending gauge"));
    assert!(response.text.contains("runloop_run_fragments_pending 3"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/runs/398348").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
