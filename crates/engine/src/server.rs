//! HTTP surface for `serve` mode.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use cinegraph_common::types::{Recommendation, RecommendationParams};

use crate::recommend::{self, ParamOverrides};
use crate::store::GraphStore;

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub store: Arc<dyn GraphStore>,
    pub params: RecommendationParams,
    pub metrics_handle: PrometheusHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/recommendations/{user_id}", get(recommendations_handler))
        .with_state(state)
}

/// Bind `port` on all interfaces and serve until the process stops.
pub async fn serve(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Cinegraph listening");
    axum::serve(listener, router(state)).await
}

/// Health check endpoint. Reports whether the graph store answers.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let graph_ok = match state.store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Graph store health check failed");
            false
        }
    };

    let status = if graph_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if graph_ok { "healthy" } else { "unhealthy" },
        "services": {
            "graph": if graph_ok { "healthy" } else { "unhealthy" },
        }
    });

    (status, Json(body))
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(overrides): Query<ParamOverrides>,
) -> Result<Json<Vec<Recommendation>>, (StatusCode, Json<serde_json::Value>)> {
    let params = overrides.apply(&state.params);

    metrics::counter!("http.recommendations.requests").increment(1);
    recommend::recommend(state.store.as_ref(), &user_id, &params)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Recommendation query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteOp};
    use cinegraph_common::types::{prop, NodeKey, Properties, RelType};
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn state(store: MemoryStore) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(store),
            params: RecommendationParams::default(),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut liked = Properties::new();
        liked.insert(prop::RATING.into(), 5.0.into());
        let mut heat = Properties::new();
        heat.insert(prop::TITLE.into(), "Heat".into());
        heat.insert(prop::IMDB_RATING.into(), 8.3.into());
        let mut ronin = Properties::new();
        ronin.insert(prop::TITLE.into(), "Ronin".into());
        ronin.insert(prop::IMDB_RATING.into(), 7.2.into());

        store
            .execute_batch(vec![
                WriteOp::upsert_node(NodeKey::movie("1"), heat),
                WriteOp::upsert_node(NodeKey::movie("2"), ronin),
                WriteOp::upsert_node(NodeKey::genre("Action"), Properties::new()),
                WriteOp::upsert_node(NodeKey::user("7"), Properties::new()),
                WriteOp::upsert_edge(NodeKey::movie("1"), RelType::InGenre, NodeKey::genre("Action"), Properties::new()),
                WriteOp::upsert_edge(NodeKey::movie("2"), RelType::InGenre, NodeKey::genre("Action"), Properties::new()),
                WriteOp::upsert_edge(NodeKey::user("7"), RelType::Rated, NodeKey::movie("1"), liked),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let response = health_handler(State(state(MemoryStore::new())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_recommendations_apply_query_overrides() {
        let state = state(seeded().await);

        let Json(results) = recommendations_handler(
            State(state.clone()),
            Path("7".to_string()),
            Query(ParamOverrides::default()),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Ronin");

        let Json(results) = recommendations_handler(
            State(state),
            Path("7".to_string()),
            Query(ParamOverrides {
                quality: Some(7.5),
                ..ParamOverrides::default()
            }),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state(MemoryStore::new()));
    }
}
