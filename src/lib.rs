use axum::{Router, http::Method, routing::get};
use std::error::Error;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handler::{AppState, healthcheck};

pub mod api;
pub mod auth;
pub mod catalog;
pub mod circulation;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod model;
pub mod roster;

pub fn unpack_error(err: &dyn Error) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

/// Builds the full HTTP surface over an already constructed state.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(healthcheck))
        .merge(auth::routes())
        .merge(catalog::routes())
        .merge(roster::routes())
        .merge(circulation::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
