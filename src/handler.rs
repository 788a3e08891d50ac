use std::sync::Arc;

use axum::{Json, response::IntoResponse};
use serde_json::json;
use tracing::info;

use crate::auth::Authenticator;
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(db: Database, auth: Authenticator) -> Self {
        AppState {
            db: Arc::new(db),
            auth: Arc::new(auth),
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(json!({ "status": "ok" }))
}
