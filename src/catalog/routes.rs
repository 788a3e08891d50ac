use axum::{
    Router,
    routing::{get, put},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(handler::list_books).post(handler::create_book))
        .route(
            "/books/:id",
            get(handler::get_book)
                .put(handler::update_book)
                .delete(handler::delete_book),
        )
        .route(
            "/books/:id/copies",
            get(handler::list_copies).post(handler::add_copies),
        )
        .route("/copies/:id", get(handler::get_copy))
        .route("/copies/:id/status", put(handler::set_copy_status))
}
