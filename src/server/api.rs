use super::{AppState, Outcome, RelayResponse};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Submission {
    #[serde(default)]
    url: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

/// `POST {submit_path}` with `{"url": [...], "force": bool}`.
///
/// Fresh URLs are relayed even when others in the batch are duplicates; the
/// tag is `duplicate` whenever at least one was.
pub async fn submit(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<RelayResponse>, StatusCode> {
    let body = body.map_err(|e| {
        tracing::warn!(error = %e, "failed to read submission body");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let submission: Submission = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "invalid submission body");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let urls = submission.url.unwrap_or_default();
    let relayed = state.relay(&urls, submission.force, Vec::new()).await;

    let outcome = if relayed.duplicates.is_empty() {
        Outcome::Success
    } else {
        Outcome::Duplicate
    };

    Ok(Json(RelayResponse::new(relayed.media, outcome)))
}
