//! End-to-end lifecycle tests against a real database. Each test skips when
//! DATABASE_URL is not set, so the suite stays green in environments without
//! Postgres.

use bigdecimal::BigDecimal;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use seva_core::db::queries;
use seva_core::directory::DirectoryClient;
use seva_core::domain::coupon::{CouponValue, Stage};
use seva_core::error::AppError;
use seva_core::middleware::auth::{AuthUser, Role};
use seva_core::services::lifecycle::{
    CreateCouponRequest, LifecycleService, PurchaseRequest, RedeemRequest, SettleRequest,
};
use seva_core::services::notifier::NoopNotifier;

async fn setup() -> Option<(PgPool, LifecycleService)> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    Migrator::new(Path::new("./migrations"))
        .await
        .ok()?
        .run(&pool)
        .await
        .ok()?;

    let lifecycle = LifecycleService::new(
        pool.clone(),
        DirectoryClient::new("http://localhost:4000".to_string()),
        Arc::new(NoopNotifier),
        "https://cdn.seva.org/qr".to_string(),
        false,
    );
    Some((pool, lifecycle))
}

fn donor() -> AuthUser {
    AuthUser {
        id: Uuid::new_v4(),
        role: Role::Donor,
    }
}

fn admin() -> AuthUser {
    AuthUser {
        id: Uuid::new_v4(),
        role: Role::Admin,
    }
}

fn purchase_request(package_id: &str, quantity: i64) -> PurchaseRequest {
    PurchaseRequest {
        package_id: package_id.to_string(),
        quantity,
        partner_id: None,
        beneficiary_name: None,
        beneficiary_phone: None,
        beneficiary_email: None,
        assign_beneficiary: false,
        payment_references: Default::default(),
    }
}

fn redeem_request() -> RedeemRequest {
    RedeemRequest {
        partner_id: None,
        location: None,
        notes: None,
        purchase_amount: None,
    }
}

#[tokio::test]
async fn bulk_purchase_creates_distinct_persisted_coupons() {
    let Some((pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let buyer = donor();
    let (pkg, coupons) = lifecycle
        .purchase(buyer, &purchase_request("FOOD_100", 5))
        .await
        .unwrap();

    assert_eq!(pkg.id, "FOOD_100");
    assert_eq!(coupons.len(), 5);

    let codes: std::collections::HashSet<&str> =
        coupons.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes.len(), 5);

    for coupon in &coupons {
        let stored = queries::get_coupon(&pool, coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.code, coupon.code);
        assert_eq!(stored.stage, Stage::Created);
        assert_eq!(stored.usage.max_uses, 1);
    }
}

#[tokio::test]
async fn quantity_is_clamped_to_fifty() {
    let Some((_pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let (_, coupons) = lifecycle
        .purchase(donor(), &purchase_request("FOOD_100", 500))
        .await
        .unwrap();
    assert_eq!(coupons.len(), 50);
}

#[tokio::test]
async fn redeem_then_settle_happy_path() {
    let Some((pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let buyer = donor();
    let (_, coupons) = lifecycle
        .purchase(buyer, &purchase_request("HEALTH_500", 1))
        .await
        .unwrap();
    let coupon = &coupons[0];
    assert_eq!(
        coupon.value,
        CouponValue::Fixed {
            amount: BigDecimal::from(500),
            currency: "INR".to_string()
        }
    );

    let outcome = lifecycle
        .redeem(buyer, coupon.id, &redeem_request())
        .await
        .unwrap();
    assert_eq!(outcome.amount, BigDecimal::from(500));
    assert_eq!(outcome.coupon.stage, Stage::RedeemedPendingSettlement);
    assert_eq!(outcome.coupon.usage.used_count, 1);

    let approver = admin();
    let settled = lifecycle
        .settle(
            approver,
            coupon.id,
            &SettleRequest {
                amount: None,
                reference_no: Some("UTR-2024-0001".to_string()),
                notes: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(settled.stage, Stage::Settled);
    let settlement = settled.settlement.unwrap();
    assert_eq!(settlement.payable_amount, BigDecimal::from(500));
    assert_eq!(settlement.approved_by, approver.id);

    // Settled coupons cannot be rejected.
    let err = lifecycle
        .reject(
            approver,
            coupon.id,
            &seva_core::services::lifecycle::RejectRequest {
                reason: Some("too late".to_string()),
                mark_as: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let stored = queries::get_coupon(&pool, coupon.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::Settled);
    assert_eq!(stored.stage_history.len(), 3);
}

#[tokio::test]
async fn second_same_day_redemption_is_refused() {
    let Some((_pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let issuer = donor();
    let coupon = lifecycle
        .create(
            issuer,
            &CreateCouponRequest {
                title: "Multi-use meal voucher".to_string(),
                description: String::new(),
                category: "food".to_string(),
                kind: None,
                value: CouponValue::Fixed {
                    amount: BigDecimal::from(50),
                    currency: "INR".to_string(),
                },
                partner: None,
                beneficiary: None,
                start_date: None,
                end_date: None,
                max_uses: Some(5),
                is_unlimited: false,
                max_redemptions_per_day: Some(1),
            },
        )
        .await
        .unwrap();

    lifecycle
        .redeem(issuer, coupon.id, &redeem_request())
        .await
        .unwrap();

    let err = lifecycle
        .redeem(issuer, coupon.id, &redeem_request())
        .await
        .unwrap_err();
    match err {
        AppError::InvalidState(message) => {
            assert!(message.contains("Daily redemption limit"));
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }
}

#[tokio::test]
async fn settlement_requires_redeemed_stage() {
    let Some((_pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let (_, coupons) = lifecycle
        .purchase(donor(), &purchase_request("FOOD_100", 1))
        .await
        .unwrap();

    let err = lifecycle
        .settle(
            admin(),
            coupons[0].id,
            &SettleRequest {
                amount: None,
                reference_no: None,
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn assign_requires_issuer_or_admin() {
    let Some((_pool, lifecycle)) = setup().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let buyer = donor();
    let (_, coupons) = lifecycle
        .purchase(buyer, &purchase_request("FOOD_100", 1))
        .await
        .unwrap();

    let stranger = donor();
    let err = lifecycle
        .assign(
            stranger,
            coupons[0].id,
            &seva_core::services::lifecycle::AssignRequest {
                beneficiary_name: Some("Asha".to_string()),
                beneficiary_phone: None,
                beneficiary_email: None,
                partner_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let assigned = lifecycle
        .assign(
            buyer,
            coupons[0].id,
            &seva_core::services::lifecycle::AssignRequest {
                beneficiary_name: Some("Asha".to_string()),
                beneficiary_phone: Some("+91 98765 43210".to_string()),
                beneficiary_email: None,
                partner_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(assigned.stage, Stage::Assigned);
    assert_eq!(
        assigned.beneficiary.as_ref().unwrap().name.as_deref(),
        Some("Asha")
    );
}
