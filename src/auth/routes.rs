use axum::{
    Router,
    routing::{get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(handler::login))
        .route("/me", get(handler::me))
        .route("/users", get(handler::list_users).post(handler::create_user))
}
