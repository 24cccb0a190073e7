//! HTTP surface of the sync server.
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /progress`: The caller's merged progress (auth required)
//! - `POST /progress/sync`: Merge a pushed slice (auth required)

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, AuthUser, Authenticator};
use super::storage::{ServerStorageError, SyncServer};
use crate::models::ProgressSlice;
use crate::validate::{self, RowRejection};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub server: SyncServer,
}

/// Error body for 4xx/5xx answers.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: String) -> Response {
    (status, Json(ErrorBody { error, message })).into_response()
}

impl IntoResponse for ServerStorageError {
    fn into_response(self) -> Response {
        match self {
            ServerStorageError::InvalidOwner(_) => {
                error_response(StatusCode::BAD_REQUEST, "validation_error", self.to_string())
            }
            ServerStorageError::Storage(_) => {
                tracing::error!("{}", self);
                error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Progress storage is unavailable".to_string(),
                )
            }
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ProgressSlice>, ServerStorageError> {
    let slice = state.server.load(&user.parent_id).await?;
    Ok(Json(slice))
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<RowRejection>,
}

/// The body is decoded row by row: a row that does not decode is rejected
/// alone, and only a body that is not a slice at all gets a 400.
async fn sync_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    let (incoming, mut rejected) = match validate::decode_slice(&body, &user.parent_id) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!("Malformed push from {}: {}", user.parent_id, e);
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("Malformed payload: {}", e),
            );
        }
    };

    match state.server.merge(&user.parent_id, &incoming).await {
        Ok(outcome) => {
            rejected.extend(outcome.report.rejected);
            Json(SyncResponse {
                success: true,
                rejected,
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Builds the full router: public health check plus the authenticated
/// progress routes.
pub fn router(server: SyncServer, auth: Arc<dyn Authenticator>) -> Router {
    let state = AppState { server };

    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/progress", get(get_progress))
        .route("/progress/sync", post(sync_progress))
        .layer(middleware::from_fn_with_state(auth, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::server::auth::{ApiKeyEntry, ApiKeyStore};
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn app() -> (Router, tempfile::TempDir) {
        let (store, temp) = test_store().await;
        let auth = ApiKeyStore::from_entries([ApiKeyEntry {
            key: "secret".to_string(),
            parent_id: "family-1".to_string(),
            created_at: None,
        }]);
        (router(SyncServer::new(store), Arc::new(auth)), temp)
    }

    fn push(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/progress/sync")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn pull(token: &str) -> Request<Body> {
        Request::builder()
            .uri("/progress")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _temp) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_unauthorized_requests() {
        let (app, _temp) = app().await;

        let missing = app.clone().oneshot(push("{}", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(missing).await["error"], "missing_auth");

        let wrong = app.clone().oneshot(pull("nope")).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let basic = app
            .oneshot(
                Request::builder()
                    .uri("/progress")
                    .header(header::AUTHORIZATION, "Basic c2VjcmV0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(basic.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(basic).await["error"], "invalid_auth");
    }

    #[tokio::test]
    async fn test_push_then_pull() {
        let (app, _temp) = app().await;
        let body = r#"{
            "progress": {"parentId": "family-1", "childName": "Maryam", "totalStars": 10, "badges": ["A"]},
            "letters": [{"letterId": "alif", "timesPlayed": 3, "mastered": true}]
        }"#;

        let response = app.clone().oneshot(push(body, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = json(response).await;
        assert_eq!(ack["success"], true);
        assert!(ack.get("rejected").is_none());

        let response = app.oneshot(pull("secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let state = json(response).await;
        assert_eq!(state["progress"]["totalStars"], 10);
        assert_eq!(state["progress"]["childName"], "Maryam");
        assert_eq!(state["letters"][0]["letterId"], "alif");
        assert_eq!(state["letters"][0]["parentId"], "family-1");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected_before_merge() {
        let (app, _temp) = app().await;

        let response = app
            .clone()
            .oneshot(push("{\"letters\": 5", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "validation_error");

        let state = json(app.oneshot(pull("secret")).await.unwrap()).await;
        assert!(state["progress"].is_null());
    }

    #[tokio::test]
    async fn test_undecodable_row_does_not_sink_the_push() {
        let (app, _temp) = app().await;
        let body = r#"{"letters": [{"letterId": "alif", "timesPlayed": 3}, {"timesPlayed": 2}]}"#;

        let response = app.clone().oneshot(push(body, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = json(response).await;
        assert_eq!(ack["success"], true);
        assert_eq!(ack["rejected"].as_array().unwrap().len(), 1);
        assert_eq!(ack["rejected"][0]["table"], "letter_progress");
        assert_eq!(ack["rejected"][0]["key"], "family-1/#1");

        let state = json(app.oneshot(pull("secret")).await.unwrap()).await;
        assert_eq!(state["letters"].as_array().unwrap().len(), 1);
        assert_eq!(state["letters"][0]["letterId"], "alif");
        assert_eq!(state["letters"][0]["timesPlayed"], 3);
    }

    #[tokio::test]
    async fn test_invalid_rows_are_reported() {
        let (app, _temp) = app().await;
        let body = r#"{
            "surahs": [
                {"surahNumber": 112, "versesHeard": [1, 2]},
                {"surahNumber": 112, "versesHeard": [9]},
                {"surahNumber": 0}
            ],
            "stories": [{"parentId": "family-2", "storyId": "yunus"}]
        }"#;

        let response = app.clone().oneshot(push(body, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = json(response).await;
        assert_eq!(ack["rejected"].as_array().unwrap().len(), 3);

        let state = json(app.oneshot(pull("secret")).await.unwrap()).await;
        assert_eq!(state["surahs"].as_array().unwrap().len(), 1);
        assert_eq!(state["stories"].as_array().unwrap().len(), 0);
    }
}
