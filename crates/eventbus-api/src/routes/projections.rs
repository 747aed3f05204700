//! Projection status and lifecycle control.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use eventbus_projection::ProjectionStatusReport;
use serde::Serialize;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for GET /.
#[derive(Debug, Serialize)]
pub struct ProjectionList {
    /// Every registered projection, by name.
    pub projections: Vec<ProjectionStatusReport>,
}

/// Response body for GET /{name}.
#[derive(Debug, Serialize)]
pub struct ProjectionView {
    /// Progress and health.
    #[serde(flatten)]
    pub report: ProjectionStatusReport,
    /// Current read model.
    pub state: serde_json::Value,
}

/// GET /
async fn list_projections(State(state): State<AppState>) -> Result<Json<ProjectionList>, ApiError> {
    Ok(Json(ProjectionList {
        projections: state.projections.list().await?,
    }))
}

/// GET /{name}
async fn get_projection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionView>, ApiError> {
    let report = state.projections.status(&name).await?;
    let read_model = state.projections.state(&name)?;
    Ok(Json(ProjectionView {
        report,
        state: read_model,
    }))
}

/// POST /{name}/rebuild
#[instrument(skip(state))]
async fn rebuild(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<ProjectionStatusReport>), ApiError> {
    let report = state.projections.rebuild(&name).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// POST /{name}/stop
#[instrument(skip(state))]
async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionStatusReport>, ApiError> {
    Ok(Json(state.projections.stop(&name).await?))
}

/// POST /{name}/start
#[instrument(skip(state))]
async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionStatusReport>, ApiError> {
    Ok(Json(state.projections.start(&name).await?))
}

/// POST /{name}/resume
#[instrument(skip(state))]
async fn resume(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionStatusReport>, ApiError> {
    Ok(Json(state.projections.resume(&name).await?))
}

/// Returns the projections router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projections))
        .route("/{name}", get(get_projection))
        .route("/{name}/rebuild", post(rebuild))
        .route("/{name}/stop", post(stop))
        .route("/{name}/start", post(start))
        .route("/{name}/resume", post(resume))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use eventbus_catalog::PORTFOLIO_SUMMARY_PROJECTION;

    use super::*;
    use crate::routes::test_helpers::{memory_state, send};

    #[tokio::test]
    async fn test_list_includes_portfolio_summary() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(app, Method::GET, "/", None).await;

        assert_eq!(status, StatusCode::OK);
        let projections = json["projections"].as_array().unwrap();
        assert_eq!(projections.len(), 1);
        assert_eq!(projections[0]["projection_name"], PORTFOLIO_SUMMARY_PROJECTION);
        assert_eq!(projections[0]["status"], "running");
    }

    #[tokio::test]
    async fn test_get_returns_report_and_state() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(
            app,
            Method::GET,
            &format!("/{PORTFOLIO_SUMMARY_PROJECTION}"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lag"], 0);
        assert_eq!(json["state"]["portfolios"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_stop_then_start_round_trips_status() {
        // Arrange
        let state = memory_state().await;
        let uri = |action: &str| format!("/{PORTFOLIO_SUMMARY_PROJECTION}/{action}");

        // Act
        let (stop_status, stopped) =
            send(router().with_state(state.clone()), Method::POST, &uri("stop"), None).await;
        let (start_status, started) =
            send(router().with_state(state), Method::POST, &uri("start"), None).await;

        // Assert
        assert_eq!(stop_status, StatusCode::OK);
        assert_eq!(stopped["status"], "stopped");
        assert_eq!(start_status, StatusCode::OK);
        assert_eq!(started["status"], "running");
    }

    #[tokio::test]
    async fn test_rebuild_returns_202() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(
            app,
            Method::POST,
            &format!("/{PORTFOLIO_SUMMARY_PROJECTION}/rebuild"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["projection_name"], PORTFOLIO_SUMMARY_PROJECTION);
    }

    #[tokio::test]
    async fn test_unknown_projection_returns_404() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(app, Method::POST, "/nope/rebuild", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "projection_not_found");
    }
}
