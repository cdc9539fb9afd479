use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::config::packages;
use crate::db::queries;
use crate::db::queries::CouponFilter;
use crate::domain::coupon::Coupon;
use crate::error::AppError;
use crate::handlers::{pagination, success, success_list, success_message, Pagination};
use crate::middleware::auth::{AuthUser, OptionalUser, Role};
use crate::services::lifecycle::{
    AssignRequest, CreateCouponRequest, PurchaseRequest, RedeemRequest, RejectRequest,
    SendRequest, SettleRequest, UpdateCouponRequest,
};
use crate::validation;

fn remaining_uses_json(coupon: &Coupon) -> serde_json::Value {
    match coupon.remaining_uses() {
        None => json!("Unlimited"),
        Some(n) => json!(n),
    }
}

/// Serialized coupon plus the derived fields clients expect on reads.
fn coupon_with_virtuals(coupon: &Coupon) -> Result<serde_json::Value, AppError> {
    let mut value =
        serde_json::to_value(coupon).map_err(|e| AppError::Internal(e.to_string()))?;
    value["remainingUses"] = remaining_uses_json(coupon);
    value["daysRemaining"] = json!(coupon.days_remaining(Utc::now()));
    Ok(value)
}

// --- Catalog ---

pub async fn get_packages() -> impl IntoResponse {
    let all = packages::all_packages();
    success_list(all, None)
}

// --- Creation ---

pub async fn purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (pkg, coupons) = state.lifecycle.purchase(user, &payload).await?;

    Ok((
        StatusCode::CREATED,
        success_message(
            format!("{} coupon(s) created successfully", coupons.len()),
            json!({ "package": pkg, "coupons": coupons }),
        ),
    ))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = state.lifecycle.create(user, &payload).await?;

    Ok((
        StatusCode::CREATED,
        success_message("Coupon created successfully", coupon),
    ))
}

// --- Listing and lookup ---

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub status: Option<String>,
}

impl ListParams {
    fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }
}

pub async fn list_coupons(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = params.pagination().resolve(20);
    let is_admin = user.map(|u| u.is_admin()).unwrap_or(false);

    let filter = CouponFilter {
        category: params.category,
        // Non-admin callers only ever see active, in-window coupons.
        status: if is_admin { params.status } else { None },
        public_only: !is_admin,
    };

    let coupons = queries::list_coupons(&state.db, &filter, limit, offset).await?;
    let total = queries::count_coupons(&state.db, &filter).await?;

    let data = coupons
        .iter()
        .map(coupon_with_virtuals)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(success_list(&data, Some(pagination(page, limit, total))))
}

pub async fn my_coupons(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = params.pagination().resolve(10);

    let coupons = queries::list_coupons_by_issuer(
        &state.db,
        user.id,
        params.status.as_deref(),
        limit,
        offset,
    )
    .await?;
    let total =
        queries::count_coupons_by_issuer(&state.db, user.id, params.status.as_deref()).await?;

    Ok(success_list(&coupons, Some(pagination(page, limit, total))))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = queries::get_coupon(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

    // Cancelled/expired coupons are visible only to their issuer and admins.
    let is_privileged =
        user.map(|u| u.is_admin() || u.id == coupon.issuer).unwrap_or(false);
    if coupon.status != crate::domain::coupon::CouponStatus::Active && !is_privileged {
        return Err(AppError::Forbidden(
            "You do not have permission to view this coupon".to_string(),
        ));
    }

    Ok(success(coupon_with_virtuals(&coupon)?))
}

/// Public code lookup, answering *why* a coupon cannot be redeemed when it
/// cannot.
pub async fn get_coupon_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let code = validation::sanitize_string(&code).to_ascii_uppercase();
    validation::validate_coupon_code(&code)?;

    let coupon = queries::get_coupon_by_code(&state.db, &code)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(
                "Invalid coupon code. Please check the code and try again.".to_string(),
            )
        })?;

    let now = Utc::now();
    if let Some(reason) = coupon.redeemability_error(now) {
        let body = json!({
            "status": "error",
            "message": reason,
            "data": {
                "code": coupon.code,
                "title": coupon.title,
                "status": coupon.status,
                "validFrom": coupon.validity.start_date,
                "validUntil": coupon.validity.end_date,
                "usedCount": coupon.usage.used_count,
                "maxUses": coupon.usage.max_uses,
            },
        });
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let mut data = coupon_with_virtuals(&coupon)?;
    data["isRedeemable"] = json!(true);
    Ok(success_message("Coupon is valid", data).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

/// `{code}` → `{valid, data?}`; an unknown code reports invalid instead of
/// erroring.
pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Response, AppError> {
    let code = validation::sanitize_string(&payload.code).to_ascii_uppercase();
    if code.is_empty() {
        return Err(AppError::Validation("code: must not be empty".to_string()));
    }

    let Some(coupon) = queries::get_coupon_by_code(&state.db, &code).await? else {
        let body = json!({
            "status": "error",
            "message": "Invalid coupon code",
            "valid": false,
        });
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };

    let is_redeemable = coupon.is_redeemable(Utc::now());
    let data = if is_redeemable {
        json!({
            "code": coupon.code,
            "title": coupon.title,
            "category": coupon.category,
            "value": coupon.value,
            "validUntil": coupon.validity.end_date,
            "remainingUses": remaining_uses_json(&coupon),
        })
    } else {
        serde_json::Value::Null
    };

    let body = json!({
        "status": "success",
        "valid": is_redeemable,
        "data": data,
        "message": if is_redeemable { "Coupon is valid" } else { "Coupon is invalid or expired" },
    });
    Ok(Json(body).into_response())
}

// --- Lifecycle transitions ---

pub async fn assign_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = state.lifecycle.assign(user, id, &payload).await?;
    Ok(success_message("Coupon assigned to beneficiary", coupon))
}

pub async fn redeem_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RedeemRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.lifecycle.redeem(user, id, &payload).await?;

    Ok(success_message(
        "Coupon redeemed successfully",
        json!({
            "couponCode": outcome.coupon.code,
            "remainingUses": remaining_uses_json(&outcome.coupon),
            "amount": outcome.amount,
        }),
    ))
}

pub async fn settle_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SettleRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin, Role::Staff])?;

    let coupon = state.lifecycle.settle(user, id, &payload).await?;
    Ok(success_message("Coupon settled successfully", coupon))
}

pub async fn reject_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin, Role::Partner, Role::Staff])?;

    if let Some(mark_as) = payload.mark_as.as_deref() {
        validation::validate_enum("markAs", mark_as, &["REJECTED", "CANCELLED"])?;
    }

    let coupon = state.lifecycle.reject(user, id, &payload).await?;
    Ok(success_message("Coupon rejected", coupon))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = state.lifecycle.update(user, id, &payload).await?;
    Ok(success_message("Coupon updated successfully", coupon))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.lifecycle.delete(user, id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Coupon deleted successfully",
    })))
}

// --- Delivery and wallet intake ---

pub async fn send_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;

    let (_, results) = state.lifecycle.send(user, id, &payload).await?;
    Ok(success_message("Coupon sent successfully", results))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToWalletRequest {
    pub vendor_id: Uuid,
}

pub async fn add_coupon_to_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddToWalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;

    let coupon = queries::get_coupon(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

    let vendor = state
        .directory
        .get_user(payload.vendor_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Vendor not found".to_string()))?;

    let wallet = state
        .lifecycle
        .add_coupon_to_wallet(&coupon, vendor.id, Some(user.id))
        .await?;

    Ok(success_message("Coupon added to vendor wallet", wallet))
}

// --- Analytics ---

pub async fn coupon_analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = queries::get_coupon(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

    if !user.is_admin() && coupon.issuer != user.id {
        return Err(AppError::Forbidden(
            "You do not have permission to view analytics".to_string(),
        ));
    }

    let redemption_rate = if coupon.usage.max_uses > 0 {
        ((coupon.usage.used_count as f64 / coupon.usage.max_uses as f64) * 100.0).round()
    } else {
        0.0
    };

    let timeline: Vec<_> = coupon
        .redemptions
        .iter()
        .map(|r| {
            json!({
                "date": r.redeemed_at,
                "amount": r.amount,
                "partner": r.partner,
            })
        })
        .collect();

    let mut daily: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
    for r in &coupon.redemptions {
        *daily.entry(r.redeemed_at.date_naive().to_string()).or_insert(0) += 1;
    }

    Ok(success(json!({
        "overview": {
            "totalRedemptions": coupon.usage.used_count,
            "remainingUses": remaining_uses_json(&coupon),
            "redemptionRate": redemption_rate,
        },
        "redemptionTimeline": timeline,
        "dailyRedemptions": daily,
        "status": coupon.status,
        "stage": coupon.stage,
        "daysRemaining": coupon.days_remaining(Utc::now()),
    })))
}
