use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::types::Context;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

/// Dry-run prediction from the last three stored draws. Returns a null
/// prediction until three draws exist.
pub async fn get_prediction(State(state): State<AppState>) -> impl IntoResponse {
    let history = match state.db.last_three().await {
        Ok(history) => history,
        Err(e) => {
            error!("Failed to read draw history: {}", e);
            return internal_error();
        }
    };

    let Some([n1, n2, n3]) = history else {
        return Json(json!({ "prediction": null })).into_response();
    };

    let context = match Context::from_values(n1 as i64, n2 as i64, n3 as i64) {
        Ok(context) => context,
        Err(e) => {
            error!("Stored draws out of range: {}", e);
            return internal_error();
        }
    };

    match state.engine.predict_only(&context).await {
        Ok(prediction) => {
            let summary = state.engine.summary().await;
            Json(json!({
                "prediction": prediction.predicted,
                "raw_estimate": prediction.raw_estimate,
                "markov_guess": prediction.markov_guess,
                "confidence": summary.confidence,
                "rolling_accuracy": summary.rolling_accuracy,
            }))
            .into_response()
        }
        Err(e) => {
            error!("Prediction failed: {}", e);
            internal_error()
        }
    }
}

/// Engine stats (exact-match metric) alongside the feed's bucket-metric
/// stats row. Defaults are returned before anything has been persisted.
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let feed_stats = match state.db.load_feed_stats().await {
        Ok(stats) => stats.unwrap_or_default(),
        Err(e) => {
            error!("Failed to load feed stats: {}", e);
            return internal_error();
        }
    };
    let engine = state.engine.summary().await;

    Json(json!({
        "engine": engine,
        "feed": feed_stats,
    }))
    .into_response()
}

/// Latest 50 draws, oldest first.
pub async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.recent_draws(50).await {
        Ok(draws) => Json(draws).into_response(),
        Err(e) => {
            error!("Failed to load draw history: {}", e);
            internal_error()
        }
    }
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}
