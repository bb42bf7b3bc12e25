use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use common_http_errors::{ApiError, ApiResult};
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;
use crate::error::ServiceError;

pub async fn root() -> &'static str {
    "SkyPay API is running and connected"
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct DbProbe {
    pub message: &'static str,
    pub time: DateTime<Utc>,
}

pub async fn test_db(State(state): State<AppState>) -> ApiResult<Json<DbProbe>> {
    let Some(db) = state.db.as_ref() else {
        warn!("Database probe requested but no pool is configured");
        return Err(ApiError::internal("database_unavailable", "Database connection failed", None));
    };
    let time = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
        .fetch_one(db)
        .await
        .map_err(ServiceError::DatabaseProbe)?;
    Ok(Json(DbProbe { message: "Database connected successfully!", time }))
}
