//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Handle health check requests. Includes engine call utilization.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "calls": {
            "max_concurrent": state.config.max_concurrent_calls,
            "available": state.limiter.available_permits(),
        }
    }))
}
