mod util;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use regrade::config::WorkerConfig;
use regrade::trigger::{router, SECRET_HEADER};
use regrade::worker::{prepare_classes, QueueWorker};
use std::sync::Arc;
use tower::ServiceExt;
use util::*;

const SECRET: &str = "s3cret";

async fn app(secret: Option<&str>) -> (Harness, Router) {
    let config = WorkerConfig {
        trigger_secret: secret.map(str::to_string),
        ..config()
    };
    let harness = Harness::with_config(class_snapshot(), config.clone()).await;
    let worker = QueueWorker::new(harness.store.clone(), harness.queue.clone(), config);
    (harness, router(Arc::new(worker)))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn trigger(secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/recalculate");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    builder.body(Body::empty()).expect("request")
}

#[tokio::test]
async fn health_answers_ok() {
    let (_harness, app) = app(Some(SECRET)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn trigger_without_secret_is_rejected() {
    let (harness, app) = app(Some(SECRET)).await;
    harness.enqueue_all().await;

    let response = app.oneshot(trigger(None)).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "error": "unauthorized" })
    );
    assert_eq!(harness.score(HW1, 1, true), None);
}

#[tokio::test]
async fn trigger_with_wrong_secret_is_rejected() {
    let (_harness, app) = app(Some(SECRET)).await;

    let response = app.oneshot(trigger(Some("guess"))).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trigger_with_same_length_secret_is_rejected() {
    let (harness, app) = app(Some(SECRET)).await;
    harness.enqueue_all().await;

    let response = app.oneshot(trigger(Some("s3creT"))).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.score(HW1, 1, true), None);
}

#[tokio::test]
async fn trigger_is_rejected_when_no_secret_is_configured() {
    let (_harness, app) = app(None).await;

    let response = app.oneshot(trigger(Some(""))).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trigger_runs_one_poll_cycle() {
    let (harness, app) = app(Some(SECRET)).await;
    harness.enqueue_all().await;

    let response = app.oneshot(trigger(Some(SECRET))).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["messages_read"], 20);
    assert_eq!(report["written"], 20);
    assert_eq!(report["archived"], 20);
    assert_eq!(report["batches"], 3);
    assert_close(harness.score(FINAL, 1, true), 90.0);
}

#[tokio::test]
async fn startup_preparation_gives_the_trigger_work() {
    let config = WorkerConfig {
        trigger_secret: Some(SECRET.to_string()),
        ..config()
    };
    let harness = Harness::with_config(class_snapshot(), config.clone()).await;
    let enqueued = prepare_classes(&*harness.store, &*harness.queue, &config, vec![CLASS_ID])
        .await
        .expect("classes should prepare");
    let worker = QueueWorker::new(harness.store.clone(), harness.queue.clone(), config);

    let response = router(Arc::new(worker))
        .oneshot(trigger(Some(SECRET)))
        .await
        .expect("response");

    assert_eq!(enqueued, 20);
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["messages_read"], 20);
    assert_eq!(report["written"], 20);
    assert_close(harness.score(FINAL, 1, true), 90.0);
}
