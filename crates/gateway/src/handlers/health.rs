//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub index: CheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<CheckResult>,
    /// Reported only; the embedder falls back to direct calls without Redis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CheckResult>,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn down(error: impl ToString) -> Self {
        Self {
            status: "down".to_string(),
            fragments: None,
            latency_ms: None,
            error: Some(error.to_string()),
        }
    }

    fn up(latency_ms: u64) -> Self {
        Self {
            status: "up".to_string(),
            fragments: None,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// Liveness check - always returns ok if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check - index size, plus database and Redis pings when configured
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let index_check = match state.index.writer.count().await {
        Ok(count) => CheckResult {
            status: "up".to_string(),
            fragments: Some(count),
            latency_ms: None,
            error: None,
        },
        Err(e) => CheckResult::down(e),
    };

    let database_check = match &state.index.db {
        Some(db) => {
            let start = std::time::Instant::now();
            Some(match db.ping().await {
                Ok(()) => CheckResult::up(start.elapsed().as_millis() as u64),
                Err(e) => CheckResult::down(e),
            })
        }
        None => None,
    };

    let cache_check = match &state.cache {
        Some(cache) => {
            let start = std::time::Instant::now();
            Some(match cache.ping().await {
                Ok(()) => CheckResult::up(start.elapsed().as_millis() as u64),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis ping failed, embedding cache degraded");
                    CheckResult::down(e)
                }
            })
        }
        None => None,
    };

    let all_healthy = index_check.is_up() && database_check.as_ref().map_or(true, CheckResult::is_up);
    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                index: index_check,
                database: database_check,
                cache: cache_check,
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use crate::test_support::router_with;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(path: &str, docs: &[(&str, u32, &str)]) -> (StatusCode, serde_json::Value) {
        let response = router_with(docs)
            .await
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = get_json("/healthz", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_reports_fragment_count() {
        let (status, body) = get_json("/ready", &[("abofol", 1, "Ficha de datos de seguridad")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["index"]["fragments"], 1);
        assert!(body["checks"].get("database").is_none());
        assert!(body["checks"].get("cache").is_none());
    }
}
