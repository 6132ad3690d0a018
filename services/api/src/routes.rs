use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use profile_wizard::wizard::{wizard_router, SessionRegistry};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_wizard_routes(registry: Arc<SessionRegistry>) -> axum::Router {
    wizard_router(registry)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{InMemoryDraftStore, SequentialSubmitter, TracingNotifier};
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use profile_wizard::config::{DraftConfig, VerificationConfig};
    use profile_wizard::wizard::{Collaborators, StaticCodeTransport, TokioScheduler};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let collaborators = Collaborators {
            store: Arc::new(InMemoryDraftStore::default()),
            transport: Arc::new(StaticCodeTransport::default()),
            notifier: Arc::new(TracingNotifier),
            submitter: Arc::new(SequentialSubmitter::default()),
            scheduler: Arc::new(TokioScheduler::current().expect("inside runtime")),
        };
        let registry = SessionRegistry::new(
            collaborators,
            DraftConfig::default(),
            VerificationConfig::default(),
        )
        .expect("schemas build");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_wizard_routes(Arc::new(registry)).layer(Extension(state))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn readiness_reflects_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "initializing");

        let state = AppState {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        state.readiness.store(true, Ordering::Release);
        let response = readiness_endpoint(Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wizard_sessions_are_served_next_to_health() {
        let router = app(true);

        let health = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(health.status(), StatusCode::OK);

        let opened = router
            .oneshot(
                Request::post("/api/v1/profiles/sponsor/sessions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"owner":"user-3"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(opened.status(), StatusCode::CREATED);

        let body = json_body(opened).await;
        assert!(body["session_id"].as_str().is_some());
        assert_eq!(body["session"]["entity"], "sponsor");
        assert_eq!(body["session"]["completion"]["percentage"], 0);
    }
}
