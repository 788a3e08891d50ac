use axum::{
    body::Bytes,
    extract::State,
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;

use super::{CheckoutDetail, CheckoutFilter, CheckoutRecord, Circulation, CreateCheckout, ReturnCheckout};
use crate::api::{Json, Page, PaginationParams, Path, Query, created, success};
use crate::auth::AuthorizedCaller;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::handler::AppState;
use crate::model::{ANY_ROLE, CheckoutStatus, STAFF};

#[derive(Debug, Deserialize)]
pub struct CheckoutQuery {
    pub status: Option<CheckoutStatus>,
    pub student_id: Option<i32>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl CheckoutQuery {
    fn page(&self) -> Page {
        PaginationParams {
            limit: self.limit,
            offset: self.offset,
        }
        .page()
    }
}

async fn load_record(db: &Database, id: i32) -> AppResult<CheckoutRecord> {
    Circulation::new(db)
        .get_checkout(id)
        .await?
        .ok_or_else(|| AppError::not_found("checkout record not found"))
}

async fn list_fresh(db: &Database, filter: CheckoutFilter, page: Page) -> AppResult<Response> {
    let circulation = Circulation::new(db);
    circulation.mark_overdue(Utc::now().date_naive()).await?;
    let entries = circulation.list_checkouts(filter, page).await?;
    Ok(success(entries))
}

pub async fn list_checkouts(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<CheckoutQuery>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let filter = CheckoutFilter {
        status: params.status,
        student_id: params.student_id,
    };
    list_fresh(&state.db, filter, params.page()).await
}

pub async fn create_checkout(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Json(payload): Json<CreateCheckout>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    caller.require_self_or_staff(payload.student_id)?;

    let record = Circulation::new(&state.db).checkout(payload, Utc::now()).await?;
    Ok(created(record))
}

pub async fn get_checkout(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let record = load_record(&state.db, id).await?;
    caller.require_self_or_staff(record.student_id)?;
    Ok(success(record))
}

/// The body is optional; `returned_on` defaults to today.
pub async fn return_checkout(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    body: Bytes,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    let payload: ReturnCheckout = if body.iter().all(u8::is_ascii_whitespace) {
        ReturnCheckout::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::validation(format!("invalid return payload: {e}")))?
    };

    let record = load_record(&state.db, id).await?;
    caller.require_self_or_staff(record.student_id)?;

    let returned_on = payload.returned_on.unwrap_or_else(|| Utc::now().date_naive());
    let record = Circulation::new(&state.db).return_checkout(id, returned_on).await?;
    Ok(success(record))
}

pub async fn my_checkouts(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<PaginationParams>,
) -> AppResult<Response> {
    caller.require(ANY_ROLE)?;
    // only students borrow, so staff have no entries of their own
    if caller.is_staff() {
        return Ok(success(Vec::<CheckoutDetail>::new()));
    }
    let filter = CheckoutFilter {
        status: None,
        student_id: Some(caller.id),
    };
    list_fresh(&state.db, filter, params.page()).await
}

pub async fn student_checkouts(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    if !state.db.exists("students", id).await? {
        return Err(AppError::not_found("student not found"));
    }
    let filter = CheckoutFilter {
        status: None,
        student_id: Some(id),
    };
    list_fresh(&state.db, filter, params.page()).await
}
