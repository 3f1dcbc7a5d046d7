//! Router tests: webhook filtering and the operator API, driven with
//! `tower::ServiceExt::oneshot` against in-memory capabilities.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use tower::ServiceExt;

use baton_core::{ConnectionId, WorkerEvent};

use common::{fixture, wait_for};

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn marked_push_pulls_and_spawns() {
    let f = fixture();
    let req = post_json(
        "/payload",
        r#"{"ref":"refs/heads/main","commits":[{"message":"[DEPLOY] ship it"}]}"#,
    );

    let resp = f.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"OK");

    assert_eq!(wait_for(&f.source.pulls, 1).await, 1);
    assert_eq!(wait_for(&f.supervisor.spawns, 1).await, 1);
}

#[tokio::test]
async fn unmarked_or_foreign_pushes_are_ignored() {
    let f = fixture();
    for body in [
        r#"{"ref":"refs/heads/main","commits":[{"message":"refactor"}]}"#,
        r#"{"ref":"refs/heads/feature","commits":[{"message":"[DEPLOY] nope"}]}"#,
        "this is not json",
    ] {
        let resp = f
            .router
            .clone()
            .oneshot(post_json("/payload", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.source.pulls.load(Ordering::SeqCst), 0);
    assert_eq!(f.supervisor.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn status_reports_workers_and_active() {
    let f = fixture();
    let id = ConnectionId::from_seq(1);
    let (tx, _rx) = mpsc::unbounded_channel();
    f.controller.connect(id.clone(), tx).await;
    f.controller
        .handle(
            &id,
            WorkerEvent::decode(r#"{"t":"hello","d":{"version":"1.4"}}"#).unwrap(),
        )
        .await;

    let req = Request::builder()
        .uri("/api/v1/status")
        .body(Body::empty())
        .unwrap();
    let resp = f.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    let data = &json["data"];
    assert_eq!(data["active"], "conn-00000001");
    assert_eq!(data["sane"], true);
    assert_eq!(data["last_known_good"], "abc123");
    assert_eq!(data["workers"][0]["version"], "1.4.0");
    assert_eq!(data["workers"][0]["state"], "identified");
    assert!(data["cache_age_ms"].is_null());
}

#[tokio::test]
async fn try_again_spawns_a_worker() {
    let f = fixture();
    let resp = f
        .router
        .oneshot(post_json("/api/v1/try-again", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["pid"], 4242);
    assert_eq!(f.supervisor.spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn try_again_reports_spawn_failure() {
    let f = fixture();
    f.supervisor.broken.store(true, Ordering::SeqCst);

    let resp = f
        .router
        .oneshot(post_json("/api/v1/try-again", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("python3"));
    // The halt is cleared even when the spawn fails.
    assert!(f.controller.snapshot().await.sane);
}

#[tokio::test]
async fn plain_get_on_channel_is_rejected() {
    let f = fixture();
    let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let resp = f.router.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
}
