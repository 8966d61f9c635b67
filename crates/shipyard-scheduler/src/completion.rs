//! Completion server.
//!
//! Build containers call `DELETE /builds/{build_id}/callback` when their build
//! finishes, which releases the build's slot in the pool.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use shipyard_core::{BuildId, BuilderPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type SharedPool = Arc<dyn BuilderPool>;

pub fn router(pool: SharedPool) -> Router {
    Router::new()
        .route("/builds/{build_id}/callback", delete(complete_build))
        .route("/health", get(health))
        .with_state(pool)
}

/// Serve the completion routes until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    pool: Arc<dyn BuilderPool>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Completion server listening");
    }
    axum::serve(listener, router(pool))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn complete_build(
    State(pool): State<SharedPool>,
    Path(build_id): Path<BuildId>,
) -> StatusCode {
    match pool.release_build(&build_id).await {
        Some(_) => {
            info!(build_id = %build_id, "Build completed");
            StatusCode::OK
        }
        None => {
            warn!(build_id = %build_id, "Completion for unknown build");
            StatusCode::NOT_FOUND
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ContainerBuilderPool;
    use crate::pool::tests::MockPlatform;
    use crate::timeout::{TimeoutReporter, TimeoutWatcher};
    use axum::body::Body;
    use axum::http::Request;
    use shipyard_core::build::{LOG_CALLBACK, STATUS_CALLBACK};
    use shipyard_core::{Build, JobPayload};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool(containers: usize) -> Arc<ContainerBuilderPool> {
        Arc::new(ContainerBuilderPool::new(
            Arc::new(MockPlatform::with_containers(containers)),
            containers,
        ))
    }

    fn callback_request(build_id: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(format!("/builds/{}/callback", build_id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_callback_releases_build() {
        let pool = pool(1);
        let build = Build::from_payload(JobPayload::default());
        let build_id = build.build_id;
        pool.start_build(build).await.unwrap();
        assert!(!pool.can_start_build().await);

        let response = router(pool.clone())
            .oneshot(callback_request(&build_id.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(pool.can_start_build().await);
        assert_eq!(pool.running_builds().await, 0);
    }

    #[tokio::test]
    async fn test_callback_for_unknown_build() {
        let response = router(pool(1))
            .oneshot(callback_request(&BuildId::new().to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_callback_with_malformed_id() {
        let response = router(pool(1))
            .oneshot(callback_request("not-a-build"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_completed_build_is_never_reported_as_timed_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let pool = pool(1);
        let mut build = Build::from_payload(JobPayload::default());
        build
            .container_environment
            .insert(LOG_CALLBACK.to_string(), format!("{}/log", server.uri()));
        build
            .container_environment
            .insert(STATUS_CALLBACK.to_string(), format!("{}/status", server.uri()));
        let build_id = build.build_id;
        pool.start_build(build).await.unwrap();

        let response = router(pool.clone())
            .oneshot(callback_request(&build_id.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let watcher = TimeoutWatcher::new(
            pool.clone(),
            TimeoutReporter::new(),
            Duration::ZERO,
            Duration::from_secs(30),
        );
        assert_eq!(watcher.check_once().await, 0);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_serve_until_cancelled() {
        let pool = pool(1);
        let build = Build::from_payload(JobPayload::default());
        let build_id = build.build_id;
        pool.start_build(build).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, pool.clone(), cancel.clone()));

        let response = reqwest::Client::new()
            .delete(format!("http://{}/builds/{}/callback", addr, build_id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(pool.can_start_build().await);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
