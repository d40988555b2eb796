//! HTTP routes

pub mod clusters;
pub mod login;

use axum::routing::{get, post};
use axum::Router;

use crate::server::AppState;

/// Prefix of the cluster API
pub const API_PREFIX: &str = "/api/v1/cube";

/// Build the full router
pub fn router(state: AppState) -> Router {
    let clusters = Router::new()
        .route("/info", get(clusters::cluster_info))
        .route("/namespaces", get(clusters::clusters_for_namespace))
        .route("/resources", get(clusters::cluster_resources))
        .route("/subnamespaces", get(clusters::subnamespaces))
        .route("/add", post(clusters::add_cluster))
        .route("/register", post(clusters::register_cluster));

    Router::new()
        .nest(&format!("{API_PREFIX}/clusters"), clusters)
        .route("/login", post(login::login))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

#[cfg(test)]
mod tests;
