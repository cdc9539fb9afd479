//! Coupon domain entity and its settlement-stage state machine.
//!
//! The entity is persisted as a JSONB document; everything here is pure
//! in-memory behavior. Stage transition legality is checked by the lifecycle
//! service, not here — `record_stage_change` only appends history and moves
//! the pointer.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CODE_SUFFIX_LEN: usize = 8;
// Ambiguous glyphs (0/O, 1/I) are excluded; codes are read out loud at counters.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Position in the donor → beneficiary → vendor settlement flow, distinct
/// from `status` (active/cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Created,
    Assigned,
    RedeemedPendingSettlement,
    Settled,
    Rejected,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Created => "CREATED",
            Stage::Assigned => "ASSIGNED",
            Stage::RedeemedPendingSettlement => "REDEEMED_PENDING_SETTLEMENT",
            Stage::Settled => "SETTLED",
            Stage::Rejected => "REJECTED",
            Stage::Cancelled => "CANCELLED",
        }
    }

    /// Legal edges: CREATED→ASSIGNED→REDEEMED_PENDING_SETTLEMENT→SETTLED,
    /// plus REJECTED/CANCELLED from anywhere except SETTLED. Re-assignment
    /// (ASSIGNED→ASSIGNED) is allowed.
    pub fn allows(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Settled, _) => false,
            (_, Rejected) | (_, Cancelled) => true,
            (Created, Assigned) | (Assigned, Assigned) => true,
            (Created, RedeemedPendingSettlement) | (Assigned, RedeemedPendingSettlement) => true,
            (RedeemedPendingSettlement, Settled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    Active,
    Expired,
    Cancelled,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::Active => "active",
            CouponStatus::Expired => "expired",
            CouponStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    Discount,
    FreeItem,
    Service,
}

/// What a coupon is worth. Percentage coupons have no intrinsic monetary
/// value until redeemed against a purchase amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponValue {
    Fixed { amount: BigDecimal, currency: String },
    Percentage { percent: BigDecimal },
    FreeItem { description: String },
}

impl CouponValue {
    /// Intrinsic value credited to a wallet at intake. Zero for percentage
    /// and free-item coupons.
    pub fn monetary_value(&self) -> BigDecimal {
        match self {
            CouponValue::Fixed { amount, .. } => amount.clone(),
            CouponValue::Percentage { .. } | CouponValue::FreeItem { .. } => BigDecimal::from(0),
        }
    }

    /// Value of a single redemption. Percentage coupons need the out-of-band
    /// purchase amount; without one the redemption records zero.
    pub fn redemption_amount(&self, purchase_amount: Option<&BigDecimal>) -> BigDecimal {
        match self {
            CouponValue::Fixed { amount, .. } => amount.clone(),
            CouponValue::Percentage { percent } => match purchase_amount {
                Some(purchase) if purchase > &BigDecimal::from(0) => {
                    (purchase * percent) / BigDecimal::from(100)
                }
                _ => BigDecimal::from(0),
            },
            CouponValue::FreeItem { .. } => BigDecimal::from(0),
        }
    }

    pub fn is_percentage(&self) -> bool {
        matches!(self, CouponValue::Percentage { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryContact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl BeneficiaryContact {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub max_uses: i64,
    pub used_count: i64,
    pub is_unlimited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudPrevention {
    pub is_verified: bool,
    pub verification_method: String,
    pub max_redemptions_per_day: i64,
}

impl Default for FraudPrevention {
    fn default() -> Self {
        Self {
            is_verified: true,
            verification_method: "manual".to_string(),
            max_redemptions_per_day: 1,
        }
    }
}

/// Audit trail entry; the history is append-only and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageChange {
    pub stage: Stage,
    pub changed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub redeemed_by: Uuid,
    pub redeemed_at: DateTime<Utc>,
    pub amount: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub payable_amount: BigDecimal,
    pub approved_by: Uuid,
    pub reference_no: String,
    pub paid_on: DateTime<Utc>,
}

/// The payload encoded into the coupon QR image. Persisted alongside the
/// image reference so it can be re-derived without the encoder service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub code: String,
    #[serde(rename = "packageId", skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    pub category: String,
    pub amount: BigDecimal,
    #[serde(rename = "validUntil")]
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    pub url: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReferences {
    pub transaction_id: String,
    pub gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: CouponKind,
    pub value: CouponValue,
    pub issuer: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donor: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<BeneficiaryContact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<Uuid>,
    pub validity: Validity,
    pub usage: Usage,
    pub fraud_prevention: FraudPrevention,
    pub stage: Stage,
    pub stage_history: Vec<StageChange>,
    pub redemptions: Vec<Redemption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub status: CouponStatus,
    pub qr_code: QrCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    pub payment_references: PaymentReferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Redeemability predicate: active status and flag, inside the validity
    /// window, with uses remaining (or unlimited).
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == CouponStatus::Active
            && self.validity.is_active
            && now >= self.validity.start_date
            && now <= self.validity.end_date
            && (self.usage.is_unlimited || self.usage.used_count < self.usage.max_uses)
    }

    /// Why `is_redeemable` is false, for the public code-lookup response.
    /// Checked in priority order: not-yet-active, expired, inactive status,
    /// usage exhausted.
    pub fn redeemability_error(&self, now: DateTime<Utc>) -> Option<String> {
        if self.is_redeemable(now) {
            return None;
        }
        if now < self.validity.start_date {
            return Some("Coupon is not yet active".to_string());
        }
        if now > self.validity.end_date {
            return Some("Coupon has expired".to_string());
        }
        if self.status != CouponStatus::Active || !self.validity.is_active {
            return Some(format!("Coupon is {}", self.status.as_str()));
        }
        if !self.usage.is_unlimited && self.usage.used_count >= self.usage.max_uses {
            return Some("Coupon usage limit reached".to_string());
        }
        Some("Coupon is not valid".to_string())
    }

    /// Appends to the history and moves the stage pointer. Callers are
    /// responsible for only moving along edges `Stage::allows` accepts.
    pub fn record_stage_change(
        &mut self,
        stage: Stage,
        changed_by: Option<Uuid>,
        notes: impl Into<String>,
    ) {
        let now = Utc::now();
        self.stage_history.push(StageChange {
            stage,
            changed_at: now,
            changed_by,
            notes: Some(notes.into()),
        });
        self.stage = stage;
        self.updated_at = now;
    }

    /// Records one redemption event: append to the log, bump the counter.
    /// Deliberately does NOT advance the stage — the lifecycle service pairs
    /// this with an explicit `record_stage_change` so the two effects cannot
    /// drift apart.
    pub fn record_redemption(&mut self, redemption: Redemption) {
        self.updated_at = redemption.redeemed_at;
        self.redemptions.push(redemption);
        self.usage.used_count += 1;
    }

    /// Same-day redemption count, compared on the calendar date. The log is
    /// the counter; there is no separate per-day tally to drift.
    pub fn redemptions_on(&self, date: NaiveDate) -> usize {
        self.redemptions
            .iter()
            .filter(|r| r.redeemed_at.date_naive() == date)
            .count()
    }

    pub fn latest_redemption(&self) -> Option<&Redemption> {
        self.redemptions.last()
    }

    /// `None` means unlimited.
    pub fn remaining_uses(&self) -> Option<i64> {
        if self.usage.is_unlimited {
            None
        } else {
            Some((self.usage.max_uses - self.usage.used_count).max(0))
        }
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.validity.end_date - now).num_days().max(0)
    }

    pub fn monetary_value(&self) -> BigDecimal {
        self.value.monetary_value()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.usage.is_unlimited && self.usage.used_count >= self.usage.max_uses
    }
}

/// Prefix for generated codes: first four alphanumerics of the category or
/// package id, uppercased. Falls back to "CPKG".
pub fn code_prefix(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect();
    if cleaned.is_empty() {
        "CPKG".to_string()
    } else {
        cleaned.to_ascii_uppercase()
    }
}

/// One code candidate. Uniqueness is enforced by the database unique index;
/// callers retry on a duplicate-key insert error.
pub fn generate_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_SUFFIX_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_coupon() -> Coupon {
        let now = Utc::now();
        let issuer = Uuid::new_v4();
        Coupon {
            id: Uuid::new_v4(),
            code: "FOOD7K2MQXAB".to_string(),
            title: "Food Coupon – ₹100".to_string(),
            description: "A meal voucher".to_string(),
            category: "food".to_string(),
            kind: CouponKind::Discount,
            value: CouponValue::Fixed {
                amount: BigDecimal::from(100),
                currency: "INR".to_string(),
            },
            issuer,
            donor: Some(issuer),
            partner: None,
            beneficiary: None,
            assigned_at: None,
            assigned_by: None,
            validity: Validity {
                start_date: now - Duration::days(1),
                end_date: now + Duration::days(29),
                is_active: true,
            },
            usage: Usage {
                max_uses: 1,
                used_count: 0,
                is_unlimited: false,
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
                url: "https://cdn.seva.org/qr/FOOD7K2MQXAB.png".to_string(),
                data: "{}".to_string(),
            },
            package_id: Some("FOOD_100".to_string()),
            payment_references: PaymentReferences {
                transaction_id: "COUPON-FOOD_100-FOOD7K2MQXAB-1".to_string(),
                gateway: "coupon".to_string(),
                gateway_reference: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn redemption_by(user: Uuid, amount: i64) -> Redemption {
        Redemption {
            redeemed_by: user,
            redeemed_at: Utc::now(),
            amount: BigDecimal::from(amount),
            partner: None,
            location: None,
            notes: None,
        }
    }

    #[test]
    fn stage_graph_edges() {
        use Stage::*;
        assert!(Created.allows(Assigned));
        assert!(Assigned.allows(Assigned));
        assert!(Created.allows(RedeemedPendingSettlement));
        assert!(Assigned.allows(RedeemedPendingSettlement));
        assert!(RedeemedPendingSettlement.allows(Settled));
        assert!(Created.allows(Rejected));
        assert!(RedeemedPendingSettlement.allows(Cancelled));

        assert!(!Settled.allows(Rejected));
        assert!(!Settled.allows(Cancelled));
        assert!(!Settled.allows(Assigned));
        assert!(!Created.allows(Settled));
        assert!(!Assigned.allows(Created));
        assert!(!RedeemedPendingSettlement.allows(Assigned));
    }

    #[test]
    fn stage_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&Stage::RedeemedPendingSettlement).unwrap();
        assert_eq!(json, "\"REDEEMED_PENDING_SETTLEMENT\"");
        let back: Stage = serde_json::from_str("\"CREATED\"").unwrap();
        assert_eq!(back, Stage::Created);
    }

    #[test]
    fn fresh_coupon_is_redeemable() {
        let coupon = sample_coupon();
        assert!(coupon.is_redeemable(Utc::now()));
        assert!(coupon.redeemability_error(Utc::now()).is_none());
    }

    #[test]
    fn not_yet_active_coupon() {
        let mut coupon = sample_coupon();
        coupon.validity.start_date = Utc::now() + Duration::days(2);
        assert!(!coupon.is_redeemable(Utc::now()));
        assert_eq!(
            coupon.redeemability_error(Utc::now()).unwrap(),
            "Coupon is not yet active"
        );
    }

    #[test]
    fn expired_coupon() {
        let mut coupon = sample_coupon();
        coupon.validity.end_date = Utc::now() - Duration::hours(1);
        assert_eq!(
            coupon.redeemability_error(Utc::now()).unwrap(),
            "Coupon has expired"
        );
    }

    #[test]
    fn cancelled_coupon_reports_status() {
        let mut coupon = sample_coupon();
        coupon.status = CouponStatus::Cancelled;
        assert_eq!(
            coupon.redeemability_error(Utc::now()).unwrap(),
            "Coupon is cancelled"
        );
    }

    #[test]
    fn exhausted_coupon() {
        let mut coupon = sample_coupon();
        coupon.usage.used_count = 1;
        assert!(!coupon.is_redeemable(Utc::now()));
        assert_eq!(
            coupon.redeemability_error(Utc::now()).unwrap(),
            "Coupon usage limit reached"
        );
        assert_eq!(coupon.remaining_uses(), Some(0));
    }

    #[test]
    fn unlimited_coupon_ignores_usage_cap() {
        let mut coupon = sample_coupon();
        coupon.usage.is_unlimited = true;
        coupon.usage.used_count = 99;
        assert!(coupon.is_redeemable(Utc::now()));
        assert_eq!(coupon.remaining_uses(), None);
    }

    #[test]
    fn record_redemption_keeps_log_and_counter_in_step() {
        let mut coupon = sample_coupon();
        let user = Uuid::new_v4();
        coupon.record_redemption(redemption_by(user, 100));

        assert_eq!(coupon.usage.used_count, 1);
        assert_eq!(coupon.redemptions.len(), 1);
        assert_eq!(coupon.redemptions.len() as i64, coupon.usage.used_count);
        // Stage does not move here; that is the lifecycle service's call.
        assert_eq!(coupon.stage, Stage::Created);
    }

    #[test]
    fn daily_count_is_date_truncated() {
        let mut coupon = sample_coupon();
        let user = Uuid::new_v4();
        coupon.usage.max_uses = 10;

        let mut today = redemption_by(user, 10);
        today.redeemed_at = Utc::now();
        let mut yesterday = redemption_by(user, 10);
        yesterday.redeemed_at = Utc::now() - Duration::days(1);

        coupon.record_redemption(yesterday);
        coupon.record_redemption(today);

        assert_eq!(coupon.redemptions_on(Utc::now().date_naive()), 1);
    }

    #[test]
    fn stage_history_appends_one_entry_per_transition() {
        let mut coupon = sample_coupon();
        let admin = Uuid::new_v4();
        let before = coupon.stage_history.len();

        coupon.record_stage_change(Stage::Assigned, Some(admin), "Assigned to beneficiary");
        assert_eq!(coupon.stage, Stage::Assigned);
        assert_eq!(coupon.stage_history.len(), before + 1);

        coupon.record_stage_change(
            Stage::RedeemedPendingSettlement,
            Some(admin),
            "Coupon redeemed",
        );
        assert_eq!(coupon.stage_history.len(), before + 2);
        assert_eq!(
            coupon.stage_history.last().unwrap().stage,
            Stage::RedeemedPendingSettlement
        );
    }

    #[test]
    fn fixed_value_resolution() {
        let value = CouponValue::Fixed {
            amount: BigDecimal::from(500),
            currency: "INR".to_string(),
        };
        assert_eq!(value.monetary_value(), BigDecimal::from(500));
        assert_eq!(value.redemption_amount(None), BigDecimal::from(500));
        // A purchase amount on a fixed coupon is ignored.
        assert_eq!(
            value.redemption_amount(Some(&BigDecimal::from(9000))),
            BigDecimal::from(500)
        );
    }

    #[test]
    fn percentage_value_resolution() {
        let value = CouponValue::Percentage {
            percent: BigDecimal::from(20),
        };
        // No intrinsic wallet-credit value.
        assert_eq!(value.monetary_value(), BigDecimal::from(0));
        // 20% of 250 = 50.
        assert_eq!(
            value.redemption_amount(Some(&BigDecimal::from(250))),
            BigDecimal::from(50)
        );
        // No purchase amount supplied: records zero.
        assert_eq!(value.redemption_amount(None), BigDecimal::from(0));
    }

    #[test]
    fn free_item_value_is_zero() {
        let value = CouponValue::FreeItem {
            description: "One blanket".to_string(),
        };
        assert_eq!(value.monetary_value(), BigDecimal::from(0));
        assert_eq!(value.redemption_amount(None), BigDecimal::from(0));
    }

    #[test]
    fn code_prefix_shapes() {
        assert_eq!(code_prefix("food"), "FOOD");
        assert_eq!(code_prefix("FOOD_100"), "FOOD");
        assert_eq!(code_prefix("me"), "ME");
        assert_eq!(code_prefix("--"), "CPKG");
    }

    #[test]
    fn generated_codes_carry_prefix_and_length() {
        let code = generate_code("HEAL");
        assert!(code.starts_with("HEAL"));
        assert_eq!(code.len(), 4 + CODE_SUFFIX_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..64).map(|_| generate_code("FOOD")).collect();
        assert!(codes.len() > 1);
    }
}
