use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::{evaluate, JudgmentTable, Measure, MetricConfig};
use crate::pipeline::{AssignItem, Nuggetizer};
use crate::retry::CancelSignal;
use crate::types::Request;

#[derive(Clone)]
pub struct Engine {
    pub nuggetizer: Arc<Nuggetizer>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AnswerInput {
    Text(String),
    Record { text: String },
}

impl AnswerInput {
    fn text(&self) -> &str {
        match self {
            AnswerInput::Text(t) | AnswerInput::Record { text: t } => t,
        }
    }
}

fn default_measure() -> String {
    "VitalScore".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RewardReq {
    pub request: Request,
    pub answers: Vec<AnswerInput>,
    #[serde(default = "default_measure")]
    pub measure: String,
}

/// `None` marks an answer whose assignment failed or was cut short.
#[derive(Debug, Serialize)]
pub struct RewardResp {
    pub measure: String,
    pub nuggets: usize,
    pub rewards: Vec<Option<f64>>,
}

/// Nuggetizes the request once, then scores every answer against the same nuggets.
pub async fn reward_batch(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RewardReq>,
) -> Result<Json<RewardResp>, (StatusCode, String)> {
    let nuggetizer = &engine.nuggetizer;
    let base = MetricConfig::for_mode(nuggetizer.config().assign_mode);
    let measure = Measure::parse_with(&req.measure, base).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let cancel = CancelSignal::none();
    let created = nuggetizer
        .create(&req.request, &cancel)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let qid = req.request.query.id.clone();
    let items: Vec<AssignItem> = req
        .answers
        .iter()
        .map(|a| AssignItem {
            qid: qid.clone(),
            query: req.request.query.text.clone(),
            answer: a.text().to_string(),
            nuggets: created.items.clone(),
        })
        .collect();

    let rewards = nuggetizer
        .assign_batch(&items, &cancel)
        .await
        .into_iter()
        .enumerate()
        .map(|(i, res)| {
            let assigned = res.map_err(|e| warn!(answer = i, error = %e, "assignment failed")).ok()?;
            let table = JudgmentTable::from([(qid.clone(), assigned.judgments(nuggetizer.config(), false))]);
            match evaluate(&table, &[measure]) {
                Ok(metrics) => metrics.first().map(|m| m.value),
                Err(e) => {
                    warn!(answer = i, error = %e, "answer not scored");
                    None
                }
            }
        })
        .collect::<Vec<_>>();

    info!(qid = %qid, answers = rewards.len(), nuggets = created.items.len(), "reward batch scored");
    Ok(Json(RewardResp { measure: measure.to_string(), nuggets: created.items.len(), rewards }))
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/nuggets/reward_batch", post(reward_batch))
        .with_state(Arc::new(engine))
}

pub async fn run_server(engine: Engine, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving nugget rewards");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}
