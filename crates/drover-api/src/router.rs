//! Operator API router construction

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_operator_token;
use crate::chat;
use crate::handlers;
use crate::state::ApiState;

pub fn build_router(state: ApiState) -> Router {
    // everything under /api (except worker heartbeats) requires an
    // operator bearer token
    let operator_api = Router::new()
        .route(
            "/projects",
            post(handlers::projects::create_project).get(handlers::projects::list_projects),
        )
        .route(
            "/projects/{name}",
            get(handlers::projects::get_project).delete(handlers::projects::delete_project),
        )
        .route(
            "/projects/{name}/restart",
            post(handlers::projects::restart_project),
        )
        .route(
            "/projects/{name}/resize",
            post(handlers::projects::resize_project),
        )
        .route("/projects/{name}/exec", post(handlers::projects::exec_project))
        .route("/projects/{name}/task", post(handlers::tasks::put_task))
        .route("/projects/{name}/task/stop", post(handlers::tasks::stop_task))
        .route(
            "/projects/{name}/task/resume",
            post(handlers::tasks::resume_task),
        )
        .route(
            "/projects/{name}/task/respond",
            post(handlers::tasks::respond_task),
        )
        .route(
            "/projects/{name}/secrets",
            post(handlers::secrets::put_secret).get(handlers::secrets::list_secrets),
        )
        .route(
            "/projects/{name}/secrets/{key}",
            delete(handlers::secrets::delete_secret),
        )
        .route(
            "/projects/{name}/supervisor",
            post(handlers::projects::supervisor_project),
        )
        .route(
            "/projects/{name}/memory",
            get(handlers::projects::project_memory),
        )
        .route("/projects/{name}/logs", get(handlers::projects::project_logs))
        .route(
            "/projects/{name}/message",
            post(handlers::projects::message_project),
        )
        .route(
            "/projects/{name}/directives",
            get(handlers::directives::list_directives).post(handlers::directives::add_directive),
        )
        .route(
            "/projects/{name}/directives/{id}",
            delete(handlers::directives::delete_directive),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_operator_token,
        ))
        // registered after the auth layer: heartbeats carry the worker's
        // own token, checked in the handler
        .route(
            "/workers/{project}/heartbeat",
            post(handlers::workers::heartbeat),
        );

    Router::new()
        .route("/health", get(handlers::workers::health))
        .nest("/api", operator_api)
        .route("/ws/projects/{name}/chat", get(chat::chat_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
