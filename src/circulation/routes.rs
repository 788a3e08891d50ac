use axum::{
    Router,
    routing::{get, put},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkouts", get(handler::list_checkouts).post(handler::create_checkout))
        .route("/checkouts/:id", get(handler::get_checkout))
        .route("/checkouts/:id/return", put(handler::return_checkout))
        .route("/me/checkouts", get(handler::my_checkouts))
        .route("/students/:id/checkouts", get(handler::student_checkouts))
}
