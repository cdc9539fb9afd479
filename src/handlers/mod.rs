pub mod coupons;
pub mod wallets;

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

/// `{status, message?, data?}` envelope helpers shared by all handlers.
pub fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "status": "success", "data": data }))
}

pub fn success_message<T: Serialize>(message: impl Into<String>, data: T) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": message.into(),
        "data": data,
    }))
}

pub fn success_list<T: Serialize>(data: &[T], pagination: Option<Value>) -> Json<Value> {
    let mut body = json!({
        "status": "success",
        "results": data.len(),
        "data": data,
    });
    if let Some(pagination) = pagination {
        body["pagination"] = pagination;
    }
    Json(body)
}

pub fn pagination(page: i64, limit: i64, total: i64) -> Value {
    let pages = if limit > 0 {
        (total + limit - 1) / limit
    } else {
        0
    };
    json!({ "page": page, "limit": limit, "total": total, "pages": pages })
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    /// (page, limit, offset) with defaults and sane caps.
    pub fn resolve(&self, default_limit: i64) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(default_limit).clamp(1, 100);
        (page, limit, (page - 1) * limit)
    }
}

#[derive(Serialize, ToSchema)]
pub struct PoolSnapshot {
    pub connections: u32,
    pub idle: u32,
    pub max: u32,
    pub utilization_percent: f32,
}

impl PoolSnapshot {
    fn capture(pool: &sqlx::PgPool) -> Self {
        let connections = pool.size();
        let max = pool.options().get_max_connections();
        Self {
            connections,
            idle: pool.num_idle() as u32,
            max,
            utilization_percent: if max == 0 {
                0.0
            } else {
                connections as f32 * 100.0 / max as f32
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub database: String,
    pub pool: PoolSnapshot,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthReport),
        (status = 503, description = "Database unreachable", body = HealthReport)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use sqlx::Connection;

    // A full acquire-and-ping round trip, not just a pool liveness bit.
    let reachable = match state.db.acquire().await {
        Ok(mut conn) => conn.ping().await.is_ok(),
        Err(_) => false,
    };

    let (status, database) = if reachable {
        ("healthy", "connected")
    } else {
        ("unhealthy", "disconnected")
    };
    let report = HealthReport {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        pool: PoolSnapshot::capture(&state.db),
    };

    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}
