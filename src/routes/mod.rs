use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;

pub mod diagnostics;
pub mod index;
pub mod ips;

/// Extract client IP from `X-Forwarded-For` header, falling back to `ConnectInfo`.
pub(crate) fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: &ConnectInfo<SocketAddr>,
) -> IpAddr {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first_ip) = value.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    connect_info.0.ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::fetch::tests::MockFetcher;
    use crate::fetch::FetchError;
    use crate::geo::{GeoResolver, Provider};
    use crate::store::tests::MockIpStore;
    use crate::AppState;

    const PUBLIC_IP: &str = "203.0.113.7";

    fn test_state(fetcher: &MockFetcher, store: &MockIpStore) -> AppState {
        let mut tera = tera::Tera::default();
        tera.add_raw_template("index.html", include_str!("../templates/index.html"))
            .unwrap();
        AppState {
            store: Arc::new(store.clone()),
            resolver: Arc::new(GeoResolver::new(
                Provider::default_chain(),
                Arc::new(fetcher.clone()),
            )),
            tera,
        }
    }

    fn healthy_fetcher() -> MockFetcher {
        MockFetcher::default().reply(
            &format!("https://ipapi.co/{PUBLIC_IP}/json/"),
            200,
            r#"{"ip":"203.0.113.7","country_name":"Testland","region":"North","city":"Exampleton","org":"Example ISP"}"#,
        )
    }

    fn page_request(forwarded_for: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 20], 40000))));
        req
    }

    fn save_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/save-ip")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    #[test]
    fn test_extract_client_ip_prefers_first_forwarded_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let connect_info = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 8080)));

        let ip = extract_client_ip(&headers, &connect_info);
        assert_eq!(ip.to_string(), "203.0.113.7");
    }

    #[test]
    fn test_extract_client_ip_falls_back_to_connection() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "garbage".parse().unwrap());
        let connect_info = ConnectInfo(SocketAddr::from(([198, 51, 100, 20], 8080)));

        let ip = extract_client_ip(&headers, &connect_info);
        assert_eq!(ip.to_string(), "198.51.100.20");
    }

    #[tokio::test]
    async fn test_health() {
        let app = crate::build_router(test_state(&MockFetcher::default(), &MockIpStore::default()));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_renders_lookup() {
        let fetcher = healthy_fetcher();
        let store = MockIpStore::default();
        let app = crate::build_router(test_state(&fetcher, &store));

        let response = app.oneshot(page_request(Some(PUBLIC_IP))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_string(response).await;
        assert!(html.contains("Testland"));
        assert!(html.contains("Example ISP"));
        assert!(!html.contains("already been saved"));
    }

    #[tokio::test]
    async fn test_index_escapes_echoed_address() {
        let fetcher = MockFetcher::default().reply(
            &format!("https://ipapi.co/{PUBLIC_IP}/json/"),
            200,
            r#"{"ip":"</script><script>alert(1)</script>","country_name":"Testland"}"#,
        );
        let app = crate::build_router(test_state(&fetcher, &MockIpStore::default()));

        let response = app.oneshot(page_request(Some(PUBLIC_IP))).await.unwrap();
        let html = body_string(response).await;

        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains(r#"data-ip="&lt;"#));
        // The only script block is the page's own.
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[tokio::test]
    async fn test_index_reports_already_saved() {
        let fetcher = healthy_fetcher();
        let store = MockIpStore::default();
        store.insert_at(PUBLIC_IP, chrono::Utc::now());
        let app = crate::build_router(test_state(&fetcher, &store));

        let response = app.oneshot(page_request(Some(PUBLIC_IP))).await.unwrap();
        let html = body_string(response).await;
        assert!(html.contains("already been saved"));
    }

    #[tokio::test]
    async fn test_index_local_caller_makes_no_outbound_calls() {
        let fetcher = MockFetcher::default();
        let app = crate::build_router(test_state(&fetcher, &MockIpStore::default()));

        let response = app
            .oneshot(page_request(Some("192.168.1.20, 8.8.8.8")))
            .await
            .unwrap();
        let html = body_string(response).await;
        assert!(html.contains("Local Network"));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_index_reports_failure_when_providers_exhausted() {
        let fetcher = MockFetcher::default();
        let app = crate::build_router(test_state(&fetcher, &MockIpStore::default()));

        // No forwarded header: the connection address is used.
        let response = app.oneshot(page_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_string(response).await;
        assert!(html.contains("Could not determine your location"));
        assert_eq!(fetcher.calls().len(), 3);
        assert!(fetcher.calls()[0].contains("198.51.100.20"));
    }

    #[tokio::test]
    async fn test_save_ip_requires_ip() {
        let store = MockIpStore::default();
        let fetcher = MockFetcher::default();

        for body in [
            r"{}",
            r#"{"ip":""}"#,
            r#"{"ip":null}"#,
            r#"{"ip":123}"#,
            "null",
            "[]",
            "not json",
        ] {
            let app = crate::build_router(test_state(&fetcher, &store));
            let response = app.oneshot(save_request(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let json = body_json(response).await;
            assert_eq!(json["status"], "error");
            assert_eq!(json["message"], "IP address is required");
        }
        assert_eq!(store.count(), 0);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_ip_without_json_content_type_is_400() {
        let store = MockIpStore::default();
        let app = crate::build_router(test_state(&MockFetcher::default(), &store));

        let req = Request::builder()
            .method("POST")
            .uri("/save-ip")
            .body(Body::from(r#"{"ip":"203.0.113.7"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_save_ip_inserts_then_updates() {
        let fetcher = healthy_fetcher();
        let store = MockIpStore::default();
        let body = format!(r#"{{"ip":"{PUBLIC_IP}"}}"#);

        let app = crate::build_router(test_state(&fetcher, &store));
        let response = app.clone().oneshot(save_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"], format!("IP {PUBLIC_IP} saved successfully"));
        let first = store.find_by_ip_now(PUBLIC_IP);

        let response = app.oneshot(save_request(&body)).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["message"], format!("IP {PUBLIC_IP} updated successfully"));
        let second = store.find_by_ip_now(PUBLIC_IP);

        assert_eq!(store.count(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.country, "Testland");
        assert!(second.timestamp > first.timestamp);
    }

    #[tokio::test]
    async fn test_save_ip_with_providers_down_stores_unknown() {
        let fetcher = MockFetcher::default()
            .fail(&format!("https://ipapi.co/{PUBLIC_IP}/json/"), FetchError::Timeout);
        let store = MockIpStore::default();
        let app = crate::build_router(test_state(&fetcher, &store));

        let body = format!(r#"{{"ip":"{PUBLIC_IP}"}}"#);
        let response = app.oneshot(save_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = store.find_by_ip_now(PUBLIC_IP);
        assert_eq!(record.country, "Unknown");
        assert_eq!(record.isp, "Unknown");
    }

    #[tokio::test]
    async fn test_save_ip_store_failure_is_500() {
        let store = MockIpStore {
            should_fail: true,
            ..Default::default()
        };
        let app = crate::build_router(test_state(&healthy_fetcher(), &store));

        let body = format!(r#"{{"ip":"{PUBLIC_IP}"}}"#);
        let response = app.oneshot(save_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_view_ips_newest_first() {
        let store = MockIpStore::default();
        let t1 = chrono::Utc::now() - chrono::Duration::hours(2);
        let t2 = t1 + chrono::Duration::hours(1);
        let t3 = t2 + chrono::Duration::minutes(30);
        store.insert_at("1.1.1.1", t1);
        store.insert_at("3.3.3.3", t3);
        store.insert_at("2.2.2.2", t2);

        let app = crate::build_router(test_state(&MockFetcher::default(), &store));
        let req = Request::builder().uri("/view-ips").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["count"], 3);
        let order: Vec<&str> = json["ips"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["ip_address"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["3.3.3.3", "2.2.2.2", "1.1.1.1"]);
    }

    #[tokio::test]
    async fn test_test_api_reports_each_provider() {
        let fetcher = MockFetcher::default()
            .reply("https://ipapi.co/json/", 200, r#"{"ip":"203.0.113.7"}"#)
            .fail("http://ip-api.com/json/", FetchError::Timeout)
            .reply("https://ipinfo.io/json", 429, "Too Many Requests");
        let app = crate::build_router(test_state(&fetcher, &MockIpStore::default()));

        let req = Request::builder().uri("/test-api").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let json = body_json(response).await;

        assert_eq!(json["status"], "success");
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["success"], true);
        assert_eq!(results[0]["data"]["ip"], "203.0.113.7");
        assert_eq!(results[1]["status_code"], serde_json::Value::Null);
        assert_eq!(results[1]["error"], "Request timed out");
        assert_eq!(results[2]["status_code"], 429);
        assert_eq!(results[2]["success"], false);
    }
}
