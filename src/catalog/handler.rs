use axum::{
    extract::State,
    response::Response,
};
use serde::Deserialize;

use super::{AddCopies, Catalog, CreateBook, UpdateBook, UpdateCopyStatus};
use crate::api::{Json, Page, PaginationParams, Path, Query, created, no_content, success};
use crate::auth::AuthorizedCaller;
use crate::error::{AppError, AppResult};
use crate::handler::AppState;
use crate::model::{ANY_ROLE, STAFF};

#[derive(Debug, Deserialize)]
pub struct BookQuery {
    pub q: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl BookQuery {
    fn page(&self) -> Page {
        PaginationParams {
            limit: self.limit,
            offset: self.offset,
        }
        .page()
    }
}

fn book_not_found() -> AppError {
    AppError::not_found("book not found")
}

pub async fn list_books(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<BookQuery>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let books = Catalog::new(&state.db)
        .list_books(params.q.as_deref(), params.page())
        .await?;
    Ok(success(books))
}

pub async fn create_book(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Json(payload): Json<CreateBook>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let book = Catalog::new(&state.db).create_book(payload).await?;
    Ok(created(book))
}

pub async fn get_book(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let book = Catalog::new(&state.db).get_book(id).await?.ok_or_else(book_not_found)?;
    Ok(success(book))
}

pub async fn update_book(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateBook>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let book = Catalog::new(&state.db)
        .update_book(id, payload)
        .await?
        .ok_or_else(book_not_found)?;
    Ok(success(book))
}

pub async fn delete_book(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    if Catalog::new(&state.db).delete_book(id).await? {
        tracing::info!(book_id = id, deleted_by = caller.id, "book deleted");
        Ok(no_content())
    } else {
        Err(book_not_found())
    }
}

pub async fn list_copies(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let copies = Catalog::new(&state.db).list_copies(id).await?.ok_or_else(book_not_found)?;
    Ok(success(copies))
}

pub async fn add_copies(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<AddCopies>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let copies = Catalog::new(&state.db)
        .add_copies(id, payload)
        .await?
        .ok_or_else(book_not_found)?;
    Ok(created(copies))
}

pub async fn get_copy(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let copy = Catalog::new(&state.db)
        .get_copy(id)
        .await?
        .ok_or_else(|| AppError::not_found("book copy not found"))?;
    Ok(success(copy))
}

pub async fn set_copy_status(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCopyStatus>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let copy = Catalog::new(&state.db)
        .set_copy_status(id, payload)
        .await?
        .ok_or_else(|| AppError::not_found("book copy not found"))?;
    Ok(success(copy))
}
