use axum::{
    Router,
    routing::{delete, get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/students", get(handler::list_students).post(handler::create_student))
        .route(
            "/students/:id",
            get(handler::get_student)
                .put(handler::update_student)
                .delete(handler::delete_student),
        )
        .route("/classes", get(handler::list_classes).post(handler::create_class))
        .route(
            "/classes/:id",
            get(handler::get_class)
                .put(handler::update_class)
                .delete(handler::delete_class),
        )
        .route("/classes/:id/students", post(handler::enrol_student))
        .route(
            "/classes/:id/students/:student_id",
            delete(handler::unenrol_student),
        )
}
