use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{CouponRecord, WalletRecord};
use crate::domain::coupon::Coupon;
use crate::domain::wallet::Wallet;

const COUPON_COLUMNS: &str = "id, code, doc, created_at, updated_at";
const WALLET_COLUMNS: &str = "id, vendor_id, doc, created_at, updated_at";

// --- Coupon queries ---

pub async fn insert_coupon(pool: &PgPool, coupon: &Coupon) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO coupons (id, code, doc, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(coupon.id)
    .bind(&coupon.code)
    .bind(Json(coupon))
    .bind(coupon.created_at)
    .bind(coupon.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_coupon(pool: &PgPool, id: Uuid) -> Result<Option<Coupon>> {
    let record = sqlx::query_as::<_, CouponRecord>(&format!(
        "SELECT {} FROM coupons WHERE id = $1",
        COUPON_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record.map(CouponRecord::into_coupon))
}

pub async fn get_coupon_by_code(pool: &PgPool, code: &str) -> Result<Option<Coupon>> {
    let record = sqlx::query_as::<_, CouponRecord>(&format!(
        "SELECT {} FROM coupons WHERE code = $1",
        COUPON_COLUMNS
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;

    Ok(record.map(CouponRecord::into_coupon))
}

/// Row-locks the coupon for a read-modify-write. Serializes concurrent
/// mutations of the same coupon at the storage layer.
pub async fn lock_coupon(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Coupon>> {
    let record = sqlx::query_as::<_, CouponRecord>(&format!(
        "SELECT {} FROM coupons WHERE id = $1 FOR UPDATE",
        COUPON_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **executor)
    .await?;

    Ok(record.map(CouponRecord::into_coupon))
}

pub async fn update_coupon(
    executor: &mut SqlxTransaction<'_, Postgres>,
    coupon: &Coupon,
) -> Result<()> {
    sqlx::query("UPDATE coupons SET doc = $2, updated_at = $3 WHERE id = $1")
        .bind(coupon.id)
        .bind(Json(coupon))
        .bind(coupon.updated_at)
        .execute(&mut **executor)
        .await?;

    Ok(())
}

pub async fn delete_coupon(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM coupons WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct CouponFilter {
    pub category: Option<String>,
    pub status: Option<String>,
    /// Restrict to active, in-window coupons (the non-admin view).
    pub public_only: bool,
}

pub async fn list_coupons(
    pool: &PgPool,
    filter: &CouponFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Coupon>> {
    let records = sqlx::query_as::<_, CouponRecord>(&format!(
        r#"
        SELECT {} FROM coupons
        WHERE ($1::text IS NULL OR doc->>'category' = $1)
          AND ($2::text IS NULL OR doc->>'status' = $2)
          AND (NOT $3 OR (
                doc->>'status' = 'active'
                AND (doc->'validity'->>'isActive')::boolean
                AND (doc->'validity'->>'endDate')::timestamptz >= NOW()
          ))
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        "#,
        COUPON_COLUMNS
    ))
    .bind(&filter.category)
    .bind(&filter.status)
    .bind(filter.public_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(records.into_iter().map(CouponRecord::into_coupon).collect())
}

pub async fn count_coupons(pool: &PgPool, filter: &CouponFilter) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM coupons
        WHERE ($1::text IS NULL OR doc->>'category' = $1)
          AND ($2::text IS NULL OR doc->>'status' = $2)
          AND (NOT $3 OR (
                doc->>'status' = 'active'
                AND (doc->'validity'->>'isActive')::boolean
                AND (doc->'validity'->>'endDate')::timestamptz >= NOW()
          ))
        "#,
    )
    .bind(&filter.category)
    .bind(&filter.status)
    .bind(filter.public_only)
    .fetch_one(pool)
    .await
}

pub async fn list_coupons_by_issuer(
    pool: &PgPool,
    issuer: Uuid,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Coupon>> {
    let records = sqlx::query_as::<_, CouponRecord>(&format!(
        r#"
        SELECT {} FROM coupons
        WHERE doc->>'issuer' = $1::text
          AND ($2::text IS NULL OR doc->>'status' = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        COUPON_COLUMNS
    ))
    .bind(issuer)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(records.into_iter().map(CouponRecord::into_coupon).collect())
}

pub async fn count_coupons_by_issuer(
    pool: &PgPool,
    issuer: Uuid,
    status: Option<&str>,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM coupons
        WHERE doc->>'issuer' = $1::text
          AND ($2::text IS NULL OR doc->>'status' = $2)
        "#,
    )
    .bind(issuer)
    .bind(status)
    .fetch_one(pool)
    .await
}

// --- Wallet queries ---

pub async fn insert_wallet(pool: &PgPool, wallet: &Wallet) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (id, vendor_id, doc, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(wallet.id)
    .bind(wallet.vendor)
    .bind(Json(wallet))
    .bind(wallet.created_at)
    .bind(wallet.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_wallet_by_vendor(pool: &PgPool, vendor: Uuid) -> Result<Option<Wallet>> {
    let record = sqlx::query_as::<_, WalletRecord>(&format!(
        "SELECT {} FROM wallets WHERE vendor_id = $1",
        WALLET_COLUMNS
    ))
    .bind(vendor)
    .fetch_optional(pool)
    .await?;

    Ok(record.map(WalletRecord::into_wallet))
}

/// Row-locks the vendor's wallet for a read-modify-write.
pub async fn lock_wallet_by_vendor(
    executor: &mut SqlxTransaction<'_, Postgres>,
    vendor: Uuid,
) -> Result<Option<Wallet>> {
    let record = sqlx::query_as::<_, WalletRecord>(&format!(
        "SELECT {} FROM wallets WHERE vendor_id = $1 FOR UPDATE",
        WALLET_COLUMNS
    ))
    .bind(vendor)
    .fetch_optional(&mut **executor)
    .await?;

    Ok(record.map(WalletRecord::into_wallet))
}

pub async fn update_wallet(
    executor: &mut SqlxTransaction<'_, Postgres>,
    wallet: &Wallet,
) -> Result<()> {
    sqlx::query("UPDATE wallets SET doc = $2, updated_at = $3 WHERE id = $1")
        .bind(wallet.id)
        .bind(Json(wallet))
        .bind(wallet.updated_at)
        .execute(&mut **executor)
        .await?;

    Ok(())
}

pub async fn list_wallets(
    pool: &PgPool,
    vendor_type: Option<&str>,
    status: Option<&str>,
) -> Result<Vec<Wallet>> {
    let records = sqlx::query_as::<_, WalletRecord>(&format!(
        r#"
        SELECT {} FROM wallets
        WHERE ($1::text IS NULL OR doc->>'vendorType' = $1)
          AND ($2::text IS NULL OR doc->>'status' = $2)
        ORDER BY created_at DESC
        "#,
        WALLET_COLUMNS
    ))
    .bind(vendor_type)
    .bind(status)
    .fetch_all(pool)
    .await?;

    Ok(records.into_iter().map(WalletRecord::into_wallet).collect())
}
