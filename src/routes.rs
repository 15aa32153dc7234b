// src/routes.rs

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, simulado},
    state::AppState,
    utils::identity::{USER_ID_HEADER, identity_middleware},
};

/// Assembles the main application router.
///
/// * Merges the simulado catalog and attempt session sub-routers.
/// * Requires a caller identity on every route.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ]);

    let simulado_routes = Router::new()
        .route("/{id}/provas", get(simulado::list_provas))
        .route(
            "/{id}/provas/{variation}/open",
            post(attempt::open_attempt),
        );

    let attempt_routes = Router::new()
        .route("/{id}", get(attempt::get_attempt))
        .route("/{id}/answer", post(attempt::answer))
        .route("/{id}/next", post(attempt::next))
        .route("/{id}/previous", post(attempt::previous))
        .route("/{id}/goto", post(attempt::go_to))
        .route("/{id}/finish", post(attempt::finish))
        .route("/{id}/abandon", post(attempt::abandon))
        .route("/{id}/hidden", post(attempt::hidden))
        .route("/{id}/close", post(attempt::close))
        .route("/{id}/unload", post(attempt::unload));

    let result_routes = Router::new()
        .route("/me", get(simulado::my_results))
        .route("/me/stats", get(simulado::my_stats));

    Router::new()
        .nest("/api/simulados", simulado_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/results", result_routes)
        .layer(middleware::from_fn(identity_middleware))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, session::SessionRegistry, store::Stores};
    use axum::{body::Body, http::Request};
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    fn app() -> Router {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            simulado: Default::default(),
        };
        let sessions = SessionRegistry::new(Stores::sqlite(pool.clone()), config.simulado.clone());
        create_router(AppState {
            pool,
            config,
            sessions,
        })
    }

    #[tokio::test]
    async fn test_identity_is_required() {
        let response = app()
            .oneshot(Request::get("/api/results/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_overlong_identity_is_rejected() {
        let response = app()
            .oneshot(
                Request::get("/api/results/me")
                    .header(USER_ID_HEADER, "x".repeat(200))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
