use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::db::queries;
use crate::domain::wallet::{
    LastSettlement, TransactionKind, TransactionStatus, Wallet, WalletTransaction,
};
use crate::error::AppError;
use crate::handlers::{success, success_list, success_message};
use crate::middleware::auth::{AuthUser, Role};
use crate::validation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub vendor: Option<Uuid>,
    pub vendor_type: Option<String>,
    pub partner_id: Option<Uuid>,
}

pub async fn create_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateWalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;

    // Either a vendor user directly, or a partner whose linked user account
    // owns the wallet.
    let vendor_id = match (payload.vendor, payload.partner_id) {
        (Some(vendor), _) => vendor,
        (None, Some(partner_id)) => {
            let partner = state
                .directory
                .get_partner(partner_id)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?
                .ok_or_else(|| AppError::NotFound("Partner not found".to_string()))?;
            partner.linked_user_id.ok_or_else(|| {
                AppError::Validation(
                    "partnerId: partner has no linked user account".to_string(),
                )
            })?
        }
        (None, None) => {
            return Err(AppError::Validation(
                "vendor: Vendor ID or Partner ID is required".to_string(),
            ));
        }
    };

    if queries::get_wallet_by_vendor(&state.db, vendor_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "Wallet already exists for this vendor".to_string(),
        ));
    }

    state
        .directory
        .get_user(vendor_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Vendor user not found".to_string()))?;

    let wallet = Wallet::new(
        vendor_id,
        payload.vendor_type.as_deref().unwrap_or("other"),
    );
    queries::insert_wallet(&state.db, &wallet).await?;

    Ok((
        StatusCode::CREATED,
        success_message("Wallet created successfully", wallet),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletListParams {
    pub vendor_type: Option<String>,
    pub status: Option<String>,
}

pub async fn list_wallets(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<WalletListParams>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;

    let wallets = queries::list_wallets(
        &state.db,
        params.vendor_type.as_deref(),
        params.status.as_deref(),
    )
    .await?;

    Ok(success_list(&wallets, None))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(vendor_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !user.is_admin() && user.id != vendor_id {
        return Err(AppError::Forbidden(
            "You do not have permission to view this wallet".to_string(),
        ));
    }

    if let Some(wallet) = queries::get_wallet_by_vendor(&state.db, vendor_id).await? {
        return Ok(success(wallet));
    }

    // Lazily create a wallet for a known vendor on first read.
    state
        .directory
        .get_user(vendor_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Vendor not found".to_string()))?;

    let wallet = Wallet::new(vendor_id, "other");
    match queries::insert_wallet(&state.db, &wallet).await {
        Ok(()) => Ok(success(wallet)),
        Err(e) if crate::error::is_unique_violation(&e) => {
            // Lost a concurrent creation race; serve the winner's wallet.
            let existing = queries::get_wallet_by_vendor(&state.db, vendor_id)
                .await?
                .ok_or_else(|| AppError::Internal("wallet creation race".to_string()))?;
            Ok(success(existing))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_wallet_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(vendor_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !user.is_admin() && user.id != vendor_id {
        return Err(AppError::Forbidden(
            "You do not have permission to view these transactions".to_string(),
        ));
    }

    let wallet = queries::get_wallet_by_vendor(&state.db, vendor_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;

    let mut transactions = wallet.transactions;
    transactions.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));

    Ok(success_list(&transactions, None))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupRequest {
    pub amount: BigDecimal,
    pub description: Option<String>,
}

pub async fn topup_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(vendor_id): Path<Uuid>,
    Json(payload): Json<TopupRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;
    validation::validate_positive_amount("amount", &payload.amount)?;

    let mut tx = state.db.begin().await?;
    let mut wallet = queries::lock_wallet_by_vendor(&mut tx, vendor_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;

    wallet.add_transaction(WalletTransaction {
        kind: TransactionKind::Topup,
        amount: payload.amount,
        coupon: None,
        description: payload
            .description
            .unwrap_or_else(|| "Admin top-up".to_string()),
        transaction_id: None,
        processed_by: Some(user.id),
        processed_at: Utc::now(),
        status: TransactionStatus::Completed,
    });

    queries::update_wallet(&mut tx, &wallet).await?;
    tx.commit().await?;

    Ok(success_message("Wallet topped up successfully", wallet))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSettleRequest {
    pub amount: BigDecimal,
    pub transaction_id: Option<String>,
}

/// Moves accumulated vendor balance out via a settlement ledger entry.
/// Capped at the current balance; the balance never goes negative here.
pub async fn settle_wallet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(vendor_id): Path<Uuid>,
    Json(payload): Json<WalletSettleRequest>,
) -> Result<impl IntoResponse, AppError> {
    user.require_role(&[Role::Admin])?;
    validation::validate_positive_amount("amount", &payload.amount)?;

    let mut tx = state.db.begin().await?;
    let mut wallet = queries::lock_wallet_by_vendor(&mut tx, vendor_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wallet not found".to_string()))?;

    if wallet.current_balance < payload.amount {
        return Err(AppError::InvalidState("Insufficient balance".to_string()));
    }

    let now = Utc::now();
    wallet.add_transaction(WalletTransaction {
        kind: TransactionKind::Settlement,
        amount: payload.amount.clone(),
        coupon: None,
        description: "Payment settlement".to_string(),
        transaction_id: payload.transaction_id.clone(),
        processed_by: Some(user.id),
        processed_at: now,
        status: TransactionStatus::Completed,
    });
    wallet.last_settlement = Some(LastSettlement {
        date: now,
        amount: payload.amount,
        transaction_id: payload.transaction_id,
    });

    queries::update_wallet(&mut tx, &wallet).await?;
    tx.commit().await?;

    Ok(success_message("Payment settled successfully", wallet))
}
