use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use seva_core::config::packages::package_by_id;
use seva_core::domain::coupon::*;
use uuid::Uuid;

fn coupon_from_package(package_id: &str, issuer: Uuid) -> Coupon {
    let pkg = package_by_id(package_id).expect("package exists");
    let now = Utc::now();
    let expires_at = now + Duration::days(pkg.validity_days);
    let code = generate_code(pkg.code_prefix);

    Coupon {
        id: Uuid::new_v4(),
        code: code.clone(),
        title: pkg.title.to_string(),
        description: pkg.description.to_string(),
        category: pkg.category.to_string(),
        kind: pkg.kind,
        value: CouponValue::Fixed {
            amount: pkg.amount_decimal(),
            currency: pkg.currency.to_string(),
        },
        issuer,
        donor: Some(issuer),
        partner: None,
        beneficiary: None,
        assigned_at: None,
        assigned_by: None,
        validity: Validity {
            start_date: now,
            end_date: expires_at,
            is_active: true,
        },
        usage: Usage {
            max_uses: pkg.max_uses,
            used_count: 0,
            is_unlimited: pkg.is_unlimited,
        },
        fraud_prevention: FraudPrevention::default(),
        stage: Stage::Created,
        stage_history: vec![StageChange {
            stage: Stage::Created,
            changed_at: now,
            changed_by: Some(issuer),
            notes: Some("Coupon created".to_string()),
        }],
        redemptions: Vec::new(),
        settlement: None,
        rejection_reason: None,
        status: CouponStatus::Active,
        qr_code: QrCode {
            url: format!("https://cdn.seva.org/qr/{}.png", code),
            data: "{}".to_string(),
        },
        package_id: Some(pkg.id.to_string()),
        payment_references: PaymentReferences {
            transaction_id: format!("COUPON-{}-{}-1", pkg.id, code),
            gateway: "coupon".to_string(),
            gateway_reference: None,
        },
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn health_package_scenario() {
    // HEALTH_500: amount 500, validityDays 60, maxUses 1.
    let issuer = Uuid::new_v4();
    let mut coupon = coupon_from_package("HEALTH_500", issuer);

    assert_eq!(coupon.value.monetary_value(), BigDecimal::from(500));
    assert_eq!(coupon.stage, Stage::Created);
    assert_eq!(coupon.usage.used_count, 0);

    let days_left = coupon.days_remaining(Utc::now());
    assert!((59..=60).contains(&days_left));

    // Redeeming with no purchase amount override resolves the fixed amount.
    let amount = coupon.value.redemption_amount(None);
    assert_eq!(amount, BigDecimal::from(500));

    let redeemer = Uuid::new_v4();
    coupon.record_redemption(Redemption {
        redeemed_by: redeemer,
        redeemed_at: Utc::now(),
        amount,
        partner: None,
        location: None,
        notes: None,
    });
    coupon.record_stage_change(
        Stage::RedeemedPendingSettlement,
        Some(redeemer),
        "Coupon redeemed",
    );

    assert_eq!(coupon.stage, Stage::RedeemedPendingSettlement);
    assert_eq!(coupon.usage.used_count, 1);
    assert!(!coupon.is_redeemable(Utc::now()));
}

#[test]
fn usage_cap_holds_unless_unlimited() {
    let issuer = Uuid::new_v4();
    let mut coupon = coupon_from_package("FOOD_100", issuer);

    assert!(coupon.is_redeemable(Utc::now()));
    coupon.record_redemption(Redemption {
        redeemed_by: issuer,
        redeemed_at: Utc::now(),
        amount: BigDecimal::from(100),
        partner: None,
        location: None,
        notes: None,
    });

    assert_eq!(coupon.usage.used_count, coupon.usage.max_uses);
    assert!(coupon.is_exhausted());
    assert!(!coupon.is_redeemable(Utc::now()));
}

#[test]
fn second_same_day_redemption_hits_daily_cap() {
    let issuer = Uuid::new_v4();
    let mut coupon = coupon_from_package("FOOD_100", issuer);
    coupon.usage.max_uses = 10;

    assert_eq!(coupon.fraud_prevention.max_redemptions_per_day, 1);

    coupon.record_redemption(Redemption {
        redeemed_by: issuer,
        redeemed_at: Utc::now(),
        amount: BigDecimal::from(100),
        partner: None,
        location: None,
        notes: None,
    });

    let today = Utc::now().date_naive();
    let today_count = coupon.redemptions_on(today) as i64;
    assert!(today_count >= coupon.fraud_prevention.max_redemptions_per_day);
}

#[test]
fn stage_never_leaves_settled() {
    let issuer = Uuid::new_v4();
    let mut coupon = coupon_from_package("FOOD_100", issuer);

    coupon.record_stage_change(Stage::Assigned, Some(issuer), "assigned");
    coupon.record_stage_change(Stage::RedeemedPendingSettlement, Some(issuer), "redeemed");
    coupon.record_stage_change(Stage::Settled, Some(issuer), "settled");

    for next in [
        Stage::Created,
        Stage::Assigned,
        Stage::RedeemedPendingSettlement,
        Stage::Rejected,
        Stage::Cancelled,
    ] {
        assert!(!coupon.stage.allows(next), "SETTLED must not allow {}", next);
    }

    // Four transitions happened, one history entry each.
    assert_eq!(coupon.stage_history.len(), 4);
    let stages: Vec<Stage> = coupon.stage_history.iter().map(|h| h.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Created,
            Stage::Assigned,
            Stage::RedeemedPendingSettlement,
            Stage::Settled
        ]
    );
}

#[test]
fn rejection_reachable_from_all_non_terminal_stages() {
    for from in [
        Stage::Created,
        Stage::Assigned,
        Stage::RedeemedPendingSettlement,
    ] {
        assert!(from.allows(Stage::Rejected));
        assert!(from.allows(Stage::Cancelled));
    }
}

#[test]
fn codes_are_unique_per_batch() {
    // Purchasing quantity=5 yields five coupons with distinct codes.
    let issuer = Uuid::new_v4();
    let coupons: Vec<Coupon> = (0..5)
        .map(|_| coupon_from_package("FOOD_100", issuer))
        .collect();

    let codes: std::collections::HashSet<&str> =
        coupons.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes.len(), 5);

    for coupon in &coupons {
        assert!(coupon.code.starts_with("FOOD"));
        assert_eq!(coupon.usage.max_uses, 1);
        let days_left = coupon.days_remaining(Utc::now());
        assert!((29..=30).contains(&days_left));
    }
}

#[test]
fn coupon_document_round_trips_with_wire_field_names() {
    let issuer = Uuid::new_v4();
    let coupon = coupon_from_package("FOOD_100", issuer);

    let json = serde_json::to_value(&coupon).unwrap();
    assert_eq!(json["stage"], "CREATED");
    assert_eq!(json["status"], "active");
    assert_eq!(json["usage"]["maxUses"], 1);
    assert_eq!(json["usage"]["usedCount"], 0);
    assert!(json["validity"]["isActive"].as_bool().unwrap());
    assert_eq!(json["value"]["type"], "fixed");
    assert!(json["stageHistory"].is_array());

    let back: Coupon = serde_json::from_value(json).unwrap();
    assert_eq!(back.code, coupon.code);
    assert_eq!(back.stage, Stage::Created);
}
