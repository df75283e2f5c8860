use axum::extract::State;
use axum::Json;
use serde_json::Value as JsonValue;

use crate::AppState;

/// Probe each geolocation provider's base endpoint.
pub async fn test_api(State(state): State<AppState>) -> Json<JsonValue> {
    let results = state.resolver.probe().await;
    Json(serde_json::json!({
        "status": "success",
        "results": results,
    }))
}
