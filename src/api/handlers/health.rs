use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::JSend;
use crate::shutdown::ShutdownState;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub environment: String,
    pub instance_id: String,
    pub outstanding_tasks: usize,
    pub status: String,
    pub version: String,
}

pub async fn healthcheck(State(state): State<Arc<AppState>>) -> Json<JSend<HealthResponse>> {
    let status = match state.shutdown.get() {
        ShutdownState::Running => "available",
        other => other.as_str(),
    };

    JSend::success(HealthResponse {
        environment: state.config.node.environment.clone(),
        instance_id: state.config.node.instance_id.clone(),
        outstanding_tasks: state.tasks.outstanding_count(),
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
