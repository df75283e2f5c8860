use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Html;

use crate::error::AppError;
use crate::AppState;

/// Landing page: geolocate the caller and report whether they were saved before.
pub async fn index(
    State(state): State<AppState>,
    connect_info: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let client_ip = super::extract_client_ip(&headers, &connect_info).to_string();

    let data = match state.resolver.lookup(Some(client_ip.as_str())).await {
        Some(geo) => {
            let already_saved = state.store.find_by_ip(&geo.ip).await?.is_some();
            serde_json::json!({
                "success": true,
                "ip": geo.ip,
                "country": geo.country,
                "region": geo.region,
                "city": geo.city,
                "connection": { "isp": geo.isp },
                "already_saved": already_saved,
            })
        }
        None => serde_json::json!({ "success": false }),
    };

    let mut ctx = tera::Context::new();
    ctx.insert("data", &data);
    let html = state.tera.render("index.html", &ctx)?;
    Ok(Html(html))
}
