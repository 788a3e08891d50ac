use axum::{
    extract::State,
    response::Response,
};
use serde::Deserialize;

use super::{
    CreateClass, CreateStudent, Enrolment, Roster, StudentFilter, StudentWithPin, UpdateClass, UpdateStudent,
};
use crate::api::{Json, Page, PaginationParams, Path, Query, created, no_content, success};
use crate::auth::AuthorizedCaller;
use crate::error::{AppError, AppResult};
use crate::handler::AppState;
use crate::model::STAFF;

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub class_id: Option<i32>,
    pub q: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl StudentQuery {
    fn into_parts(self) -> (StudentFilter, Page) {
        let page = PaginationParams {
            limit: self.limit,
            offset: self.offset,
        }
        .page();
        let filter = StudentFilter {
            class_id: self.class_id,
            search: self.q,
        };
        (filter, page)
    }
}

fn student_not_found() -> AppError {
    AppError::not_found("student not found")
}

fn class_not_found() -> AppError {
    AppError::not_found("class not found")
}

// ============================================================================
// Students
// ============================================================================

pub async fn list_students(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<StudentQuery>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let (filter, page) = params.into_parts();
    let students = Roster::new(&state.db).list_students(filter, page).await?;
    Ok(success(students))
}

pub async fn create_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Json(payload): Json<CreateStudent>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let student = Roster::new(&state.db).create_student(payload).await?;
    Ok(created(StudentWithPin::from(student)))
}

pub async fn get_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let student = Roster::new(&state.db).get_student(id).await?.ok_or_else(student_not_found)?;
    Ok(success(student))
}

pub async fn update_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateStudent>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let student = Roster::new(&state.db)
        .update_student(id, payload)
        .await?
        .ok_or_else(student_not_found)?;
    Ok(success(StudentWithPin::from(student)))
}

pub async fn delete_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    if Roster::new(&state.db).delete_student(id).await? {
        tracing::info!(student_id = id, deleted_by = caller.id, "student deleted");
        Ok(no_content())
    } else {
        Err(student_not_found())
    }
}

// ============================================================================
// Classes
// ============================================================================

pub async fn list_classes(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Query(params): Query<PaginationParams>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let classes = Roster::new(&state.db).list_classes(params.page()).await?;
    Ok(success(classes))
}

pub async fn create_class(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Json(payload): Json<CreateClass>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let class = Roster::new(&state.db).create_class(payload).await?;
    Ok(created(class))
}

pub async fn get_class(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let class = Roster::new(&state.db).get_class(id).await?.ok_or_else(class_not_found)?;
    Ok(success(class))
}

pub async fn update_class(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateClass>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let class = Roster::new(&state.db)
        .update_class(id, payload)
        .await?
        .ok_or_else(class_not_found)?;
    Ok(success(class))
}

pub async fn delete_class(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    if Roster::new(&state.db).delete_class(id).await? {
        Ok(no_content())
    } else {
        Err(class_not_found())
    }
}

pub async fn enrol_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<i32>,
    Json(payload): Json<Enrolment>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let class = Roster::new(&state.db).enrol_student(id, payload.student_id).await?;
    Ok(success(class))
}

pub async fn unenrol_student(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path((id, student_id)): Path<(i32, i32)>,
) -> AppResult<Response> {
    caller.require(STAFF)?;
    let class = Roster::new(&state.db).unenrol_student(id, student_id).await?;
    Ok(success(class))
}
