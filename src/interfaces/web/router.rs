use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;

use super::handlers::{admin, agents, credentials, executions, providers};
use super::{AppState, auth, health_endpoint, sse_logs_endpoint};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_api_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health_endpoint));

    let admin_routes = Router::new()
        .route("/api/admin/agents", post(admin::create_agent))
        .route(
            "/api/admin/agents/{agent_id}",
            put(admin::update_agent).delete(admin::delete_agent),
        )
        .route("/api/admin/purchases", post(admin::grant_purchase))
        .route("/api/admin/subscriptions", post(admin::upsert_subscription))
        .route("/api/admin/config", get(admin::list_config))
        .route(
            "/api/admin/config/{key}",
            put(admin::set_config).delete(admin::delete_config),
        )
        .route("/api/admin/logs", get(sse_logs_endpoint))
        .layer(middleware::from_fn(auth::require_admin));

    let authed_routes = Router::new()
        .route("/api/providers", get(providers::get_providers))
        .route(
            "/api/credentials",
            get(credentials::list_credentials).post(credentials::store_credential),
        )
        .route("/api/credentials/test", post(credentials::test_credential))
        .route(
            "/api/credentials/{provider}",
            delete(credentials::delete_credential),
        )
        .route("/api/agents", get(agents::get_agents))
        .route("/api/agents/{agent_id}", get(agents::get_agent))
        .route("/api/agents/{agent_id}/execute", post(agents::execute_agent))
        .route("/api/executions", get(executions::list_executions))
        .route("/api/executions/{id}", get(executions::get_execution))
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    public_routes
        .merge(authed_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
