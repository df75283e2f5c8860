use axum::extract::{FromRequest, Request, State};
use axum::Json;
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::store::SaveOutcome;
use crate::AppState;

const IP_REQUIRED: &str = "IP address is required";

/// Body of `POST /save-ip`.
///
/// Any body without a string `ip` (wrong content type, invalid JSON, `null`,
/// non-object, non-string `ip`) is rejected with the same 400 payload.
#[derive(Debug)]
pub struct SaveIpRequest {
    pub ip: String,
}

impl<S: Send + Sync> FromRequest<S> for SaveIpRequest {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<JsonValue>::from_request(req, state)
            .await
            .map_err(|e| {
                tracing::debug!("Rejected save-ip body: {e}");
                AppError::BadRequest(IP_REQUIRED.to_string())
            })?;

        body.get("ip")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|ip| Self { ip: ip.to_string() })
            .ok_or_else(|| AppError::BadRequest(IP_REQUIRED.to_string()))
    }
}

pub async fn save_ip(
    State(state): State<AppState>,
    req: SaveIpRequest,
) -> Result<Json<JsonValue>, AppError> {
    let ip = req.ip.as_str();

    let geo = state.resolver.resolve(Some(ip)).await;
    let outcome = state.store.save(ip, &geo).await?;

    let verb = match outcome {
        SaveOutcome::Inserted(_) => "saved",
        SaveOutcome::Updated(_) => "updated",
    };
    tracing::info!("IP {ip} {verb} (record {})", outcome.record().id);

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("IP {ip} {verb} successfully"),
    })))
}

/// Every stored record, most recently written first.
pub async fn view_ips(State(state): State<AppState>) -> Result<Json<JsonValue>, AppError> {
    let ips = state.store.list_all().await?;
    Ok(Json(serde_json::json!({
        "status": "success",
        "count": ips.len(),
        "ips": ips,
    })))
}
