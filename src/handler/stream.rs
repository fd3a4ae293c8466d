use axum::{Json, extract::State};
use frame_pipe::{SessionState, stats::StatsSnapshot};
use serde::Serialize;

use crate::{api::AppState, handler::ApiJsonResult};

#[derive(Debug, Serialize)]
pub struct StreamStatus {
    session: SessionState,
    stats: StatsSnapshot,
    destination: String,
}

pub async fn status(State(state): State<AppState>) -> ApiJsonResult<StreamStatus> {
    let session = *state.stream.state.borrow();
    Ok(Json(StreamStatus {
        session,
        stats: state.stream.stats.snapshot(),
        destination: state.stream.destination.to_string(),
    }))
}
