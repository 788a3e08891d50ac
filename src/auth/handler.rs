use axum::{
    extract::State,
    response::Response,
};
use serde::Deserialize;

use super::{Accounts, AuthorizedCaller, CreateUser};
use crate::api::{Json, PaginationParams, Query, created, success};
use crate::error::AppResult;
use crate::handler::AppState;
use crate::model::{ADMIN_ONLY, ANY_ROLE};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> AppResult<Response> {
    let session = state.auth.login(&state.db, &payload.email, &payload.password).await?;
    Ok(success(session))
}

pub async fn me(caller: AuthorizedCaller) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    Ok(success(caller))
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<PaginationParams>,
) -> AppResult<Response> {
    caller.require(ADMIN_ONLY)?;
    let users = Accounts::new(&state.db).list_users(params.page()).await?;
    Ok(success(users))
}

pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Json(payload): Json<CreateUser>,
) -> AppResult<Response> {
    caller.require(ADMIN_ONLY)?;
    let user = state.auth.register(&state.db, payload).await?;
    tracing::info!(user_id = user.id, created_by = caller.id, "staff account created");
    Ok(created(user))
}
