mod support;

use axum::body::Body;
use axum::http::{header, Request as HttpRequest, StatusCode};
use nuggetizer_rs::server::{router, Engine};
use nuggetizer_rs::{Nuggetizer, NuggetizerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use support::capital_judge;
use tower::ServiceExt; // for `oneshot`

fn engine() -> Engine {
    let n = Nuggetizer::new(Arc::new(capital_judge()), NuggetizerConfig::default()).unwrap();
    Engine { nuggetizer: Arc::new(n) }
}

async fn post(payload: Value) -> (StatusCode, Vec<u8>) {
    let resp = router(engine())
        .oneshot(
            HttpRequest::post("/nuggets/reward_batch")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn payload(measure: &str) -> Value {
    json!({
        "request": {
            "query": {"qid": "q1", "text": "What is the capital of France?"},
            "documents": [
                {"docid": "d1", "segment": "Paris has been the capital of France since 987."},
                {"docid": "d2", "segment": "France shares a border with Spain."}
            ]
        },
        "answers": [
            "The capital city is Paris, in France.",
            "",
            {"text": "Madrid is near Spain."}
        ],
        "measure": measure
    })
}

#[tokio::test]
async fn reward_batch_returns_one_reward_per_answer() {
    let (status, body) = post(payload("VitalScore")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["measure"], "VitalScore");
    assert_eq!(v["nuggets"], 2);
    let rewards: Vec<f64> = v["rewards"].as_array().unwrap().iter().map(|r| r.as_f64().unwrap()).collect();
    assert_eq!(rewards, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn measure_parameters_are_honoured() {
    let (status, body) = post(payload("AllScore(strict=true)")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["measure"], "AllScore(strict=true)");
    // one of two nuggets fully supported
    assert_eq!(v["rewards"][0].as_f64().unwrap(), 0.5);
    // the third answer supports only the okay nugget
    assert_eq!(v["rewards"][2].as_f64().unwrap(), 0.5);
}

#[tokio::test]
async fn unknown_measure_is_rejected() {
    let (status, body) = post(payload("RecallAt10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("RecallAt10"));
}
