//! Coupon lifecycle orchestration: creation (ad hoc or bulk from a package),
//! assignment, redemption, settlement, rejection, and the wallet intake flow.
//! Drives both the coupon state machine and the vendor wallet ledger.
//!
//! Ordering is deliberate in the redemption flow: the coupon mutation commits
//! first, then the wallet side is attempted. A wallet failure after the
//! coupon commit is logged and NOT propagated — the caller still sees the
//! redemption succeed.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::packages::{package_by_id, CouponPackage};
use crate::db::queries;
use crate::directory::DirectoryClient;
use crate::domain::coupon::{
    code_prefix, generate_code, BeneficiaryContact, Coupon, CouponKind, CouponStatus, CouponValue,
    FraudPrevention, PaymentReferences, QrCode, QrPayload, Redemption, Stage, StageChange, Usage,
    Validity,
};
use crate::domain::wallet::{
    TransactionKind, TransactionStatus, Wallet, WalletTransaction,
};
use crate::error::{is_unique_violation, AppError};
use crate::middleware::auth::{AuthUser, Role};
use crate::services::notifier::{ChannelResults, DeliveryMethods, NotificationDispatcher, Recipient};
use crate::validation;

const MAX_PURCHASE_QUANTITY: i64 = 50;
const CODE_ALLOCATION_ATTEMPTS: u32 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub package_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub partner_id: Option<Uuid>,
    pub beneficiary_name: Option<String>,
    pub beneficiary_phone: Option<String>,
    pub beneficiary_email: Option<String>,
    #[serde(default)]
    pub assign_beneficiary: bool,
    #[serde(default)]
    pub payment_references: PaymentInput,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    pub transaction_id: Option<String>,
    pub gateway: Option<String>,
    pub gateway_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: Option<CouponKind>,
    pub value: CouponValue,
    pub partner: Option<Uuid>,
    pub beneficiary: Option<BeneficiaryContact>,
    pub start_date: Option<chrono::DateTime<Utc>>,
    pub end_date: Option<chrono::DateTime<Utc>>,
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub is_unlimited: bool,
    pub max_redemptions_per_day: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub beneficiary_name: Option<String>,
    pub beneficiary_phone: Option<String>,
    pub beneficiary_email: Option<String>,
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub partner_id: Option<Uuid>,
    pub location: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub purchase_amount: Option<BigDecimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub amount: Option<BigDecimal>,
    pub reference_no: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reason: Option<String>,
    #[serde(default)]
    pub mark_as: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub value: Option<CouponValue>,
    pub partner: Option<Uuid>,
    pub beneficiary: Option<BeneficiaryContact>,
    pub end_date: Option<chrono::DateTime<Utc>>,
    pub status: Option<CouponStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub recipient: Recipient,
    pub methods: Option<DeliveryMethods>,
    pub partner_id: Option<Uuid>,
}

#[derive(Debug)]
pub struct RedemptionOutcome {
    pub coupon: Coupon,
    pub amount: BigDecimal,
}

#[derive(Clone)]
pub struct LifecycleService {
    pool: PgPool,
    directory: DirectoryClient,
    notifier: Arc<dyn NotificationDispatcher>,
    qr_base_url: String,
    require_purchase_amount: bool,
}

impl LifecycleService {
    pub fn new(
        pool: PgPool,
        directory: DirectoryClient,
        notifier: Arc<dyn NotificationDispatcher>,
        qr_base_url: String,
        require_purchase_amount: bool,
    ) -> Self {
        Self {
            pool,
            directory,
            notifier,
            qr_base_url,
            require_purchase_amount,
        }
    }

    // --- Creation ---

    /// Bulk-creates coupons from a catalog package. Best-effort: if unit k
    /// fails to persist, units 1..k-1 remain persisted and the error is
    /// surfaced.
    pub async fn purchase(
        &self,
        donor: AuthUser,
        req: &PurchaseRequest,
    ) -> Result<(&'static CouponPackage, Vec<Coupon>), AppError> {
        let pkg = package_by_id(&req.package_id)
            .ok_or_else(|| AppError::Validation("Invalid coupon package selected".to_string()))?;

        let quantity = req.quantity.clamp(1, MAX_PURCHASE_QUANTITY);

        let beneficiary = BeneficiaryContact {
            name: req
                .beneficiary_name
                .as_deref()
                .map(validation::sanitize_string)
                .filter(|s| !s.is_empty()),
            phone: req
                .beneficiary_phone
                .as_deref()
                .map(validation::sanitize_string)
                .filter(|s| !s.is_empty()),
            email: req
                .beneficiary_email
                .as_deref()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty()),
        };
        let should_assign = req.assign_beneficiary && !beneficiary.is_empty();

        let mut created = Vec::with_capacity(quantity as usize);
        for i in 0..quantity {
            let coupon = self
                .create_from_package(pkg, donor, req, &beneficiary, should_assign, i)
                .await?;
            created.push(coupon);
        }

        tracing::info!(
            package = pkg.id,
            count = created.len(),
            donor = %donor.id,
            "coupons created from package"
        );
        Ok((pkg, created))
    }

    async fn create_from_package(
        &self,
        pkg: &CouponPackage,
        donor: AuthUser,
        req: &PurchaseRequest,
        beneficiary: &BeneficiaryContact,
        should_assign: bool,
        sequence_index: i64,
    ) -> Result<Coupon, AppError> {
        let now = Utc::now();
        let validity_days = pkg.validity_days.max(1);
        let expires_at = now + Duration::days(validity_days);
        let prefix = code_prefix(pkg.code_prefix);

        let base_txn_id = req
            .payment_references
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("COUPON-{}", pkg.id));

        let mut attempts = 0;
        loop {
            let code = generate_code(&prefix);
            let qr_payload = QrPayload {
                code: code.clone(),
                package_id: Some(pkg.id.to_string()),
                category: pkg.category.to_string(),
                amount: pkg.amount_decimal(),
                valid_until: expires_at,
            };
            let qr_data = serde_json::to_string(&qr_payload)
                .map_err(|e| AppError::Internal(e.to_string()))?;

            let mut coupon = Coupon {
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
                issuer: donor.id,
                donor: Some(donor.id),
                partner: req.partner_id,
                beneficiary: (!beneficiary.is_empty()).then(|| beneficiary.clone()),
                assigned_at: None,
                assigned_by: None,
                validity: Validity {
                    start_date: now,
                    end_date: expires_at,
                    is_active: true,
                },
                usage: Usage {
                    max_uses: pkg.max_uses.max(1),
                    used_count: 0,
                    is_unlimited: pkg.is_unlimited,
                },
                fraud_prevention: FraudPrevention {
                    max_redemptions_per_day: pkg.max_redemptions_per_day.max(1),
                    ..FraudPrevention::default()
                },
                stage: Stage::Created,
                stage_history: vec![StageChange {
                    stage: Stage::Created,
                    changed_at: now,
                    changed_by: Some(donor.id),
                    notes: Some("Coupon created".to_string()),
                }],
                redemptions: Vec::new(),
                settlement: None,
                rejection_reason: None,
                status: CouponStatus::Active,
                qr_code: QrCode {
                    url: format!("{}/{}.png", self.qr_base_url.trim_end_matches('/'), code),
                    data: qr_data,
                },
                package_id: Some(pkg.id.to_string()),
                payment_references: PaymentReferences {
                    // Per-unit suffix keeps payment references distinguishable
                    // even though the units share one purchase event.
                    transaction_id: format!("{}-{}-{}", base_txn_id, code, sequence_index + 1),
                    gateway: req
                        .payment_references
                        .gateway
                        .clone()
                        .unwrap_or_else(|| "coupon".to_string()),
                    gateway_reference: req.payment_references.gateway_reference.clone(),
                },
                created_at: now,
                updated_at: now,
            };

            if should_assign {
                coupon.assigned_at = Some(now);
                coupon.assigned_by = Some(donor.id);
                coupon.record_stage_change(Stage::Assigned, Some(donor.id), "Assigned at purchase");
            }

            match queries::insert_coupon(&self.pool, &coupon).await {
                Ok(()) => return Ok(coupon),
                Err(e) if is_unique_violation(&e) => {
                    attempts += 1;
                    if attempts >= CODE_ALLOCATION_ATTEMPTS {
                        return Err(AppError::Conflict(
                            "could not allocate a unique coupon code".to_string(),
                        ));
                    }
                    tracing::debug!(code = %code, attempts, "coupon code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ad hoc coupon creation outside the package catalog.
    pub async fn create(
        &self,
        user: AuthUser,
        req: &CreateCouponRequest,
    ) -> Result<Coupon, AppError> {
        validation::validate_required("title", &req.title)?;
        validation::validate_max_len("title", &req.title, validation::NAME_MAX_LEN)?;
        validation::validate_required("category", &req.category)?;
        match &req.value {
            CouponValue::Fixed { amount, currency } => {
                validation::validate_positive_amount("amount", amount)?;
                validation::validate_currency_code(currency)?;
            }
            CouponValue::Percentage { percent } => {
                validation::validate_percentage(percent)?;
            }
            CouponValue::FreeItem { description } => {
                validation::validate_required("description", description)?;
            }
        }

        let now = Utc::now();
        let start_date = req.start_date.unwrap_or(now);
        let end_date = req.end_date.unwrap_or(now + Duration::days(30));
        if end_date <= start_date {
            return Err(AppError::Validation(
                "endDate: must be after startDate".to_string(),
            ));
        }

        let prefix = code_prefix(&req.category);
        let mut attempts = 0;
        loop {
            let code = generate_code(&prefix);
            let qr_payload = QrPayload {
                code: code.clone(),
                package_id: None,
                category: req.category.clone(),
                amount: req.value.monetary_value(),
                valid_until: end_date,
            };
            let qr_data = serde_json::to_string(&qr_payload)
                .map_err(|e| AppError::Internal(e.to_string()))?;

            let coupon = Coupon {
                id: Uuid::new_v4(),
                code: code.clone(),
                title: req.title.clone(),
                description: req.description.clone(),
                category: req.category.clone(),
                kind: req.kind.unwrap_or(CouponKind::Discount),
                value: req.value.clone(),
                issuer: user.id,
                donor: Some(user.id),
                partner: req.partner,
                beneficiary: req.beneficiary.clone().filter(|b| !b.is_empty()),
                assigned_at: None,
                assigned_by: None,
                validity: Validity {
                    start_date,
                    end_date,
                    is_active: end_date >= now,
                },
                usage: Usage {
                    max_uses: req.max_uses.unwrap_or(1).max(1),
                    used_count: 0,
                    is_unlimited: req.is_unlimited,
                },
                fraud_prevention: FraudPrevention {
                    max_redemptions_per_day: req.max_redemptions_per_day.unwrap_or(1).max(1),
                    ..FraudPrevention::default()
                },
                stage: Stage::Created,
                stage_history: vec![StageChange {
                    stage: Stage::Created,
                    changed_at: now,
                    changed_by: Some(user.id),
                    notes: Some("Coupon created".to_string()),
                }],
                redemptions: Vec::new(),
                settlement: None,
                rejection_reason: None,
                status: CouponStatus::Active,
                qr_code: QrCode {
                    url: format!("{}/{}.png", self.qr_base_url.trim_end_matches('/'), code),
                    data: qr_data,
                },
                package_id: None,
                payment_references: PaymentReferences {
                    transaction_id: format!("COUPON-CUSTOM-{}", code),
                    gateway: "coupon".to_string(),
                    gateway_reference: None,
                },
                created_at: now,
                updated_at: now,
            };

            match queries::insert_coupon(&self.pool, &coupon).await {
                Ok(()) => return Ok(coupon),
                Err(e) if is_unique_violation(&e) => {
                    attempts += 1;
                    if attempts >= CODE_ALLOCATION_ATTEMPTS {
                        return Err(AppError::Conflict(
                            "could not allocate a unique coupon code".to_string(),
                        ));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // --- Assignment ---

    pub async fn assign(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &AssignRequest,
    ) -> Result<Coupon, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !matches!(coupon.stage, Stage::Created | Stage::Assigned) {
            return Err(AppError::InvalidState(
                "Coupon cannot be assigned in its current stage".to_string(),
            ));
        }
        if !user.is_admin() && coupon.issuer != user.id {
            return Err(AppError::Forbidden(
                "You can only assign your own coupons".to_string(),
            ));
        }

        let mut contact = coupon.beneficiary.take().unwrap_or_default();
        if let Some(name) = &req.beneficiary_name {
            contact.name = Some(validation::sanitize_string(name));
        }
        if let Some(phone) = &req.beneficiary_phone {
            contact.phone = Some(validation::sanitize_string(phone));
        }
        if let Some(email) = &req.beneficiary_email {
            contact.email = Some(email.trim().to_ascii_lowercase());
        }
        if contact.is_empty() {
            return Err(AppError::Validation(
                "beneficiary: at least one contact field is required".to_string(),
            ));
        }
        coupon.beneficiary = Some(contact);

        if let Some(partner_id) = req.partner_id {
            coupon.partner = Some(partner_id);
        }

        coupon.assigned_at = Some(Utc::now());
        coupon.assigned_by = Some(user.id);
        coupon.record_stage_change(Stage::Assigned, Some(user.id), "Assigned to beneficiary");

        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    // --- Redemption ---

    pub async fn redeem(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &RedeemRequest,
    ) -> Result<RedemptionOutcome, AppError> {
        let preview = queries::get_coupon(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !preview.is_redeemable(Utc::now()) {
            return Err(AppError::InvalidState(
                preview
                    .redeemability_error(Utc::now())
                    .unwrap_or_else(|| "Coupon is not valid or has expired".to_string()),
            ));
        }

        // Partner-role callers may only redeem at their own business. Checked
        // against the directory before taking the row lock so the HTTP call
        // does not sit inside an open transaction.
        if user.role == Role::Partner {
            let own_partner = self
                .directory
                .find_partner_by_user(user.id)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            match own_partner {
                Some(p) if preview.partner.is_none() || preview.partner == Some(p.id) => {}
                _ => {
                    return Err(AppError::Forbidden(
                        "You are not authorized to redeem this coupon".to_string(),
                    ));
                }
            }
        }

        if let Some(purchase) = &req.purchase_amount {
            validation::validate_positive_amount("purchaseAmount", purchase)?;
        }
        if self.require_purchase_amount
            && preview.value.is_percentage()
            && req.purchase_amount.is_none()
        {
            return Err(AppError::Validation(
                "purchaseAmount: required to redeem a percentage coupon".to_string(),
            ));
        }

        // All domain checks re-run under the row lock; the preview only
        // served the checks that must not hold the lock open.
        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        let now = Utc::now();
        if !coupon.is_redeemable(now) {
            return Err(AppError::InvalidState(
                coupon
                    .redeemability_error(now)
                    .unwrap_or_else(|| "Coupon is not valid or has expired".to_string()),
            ));
        }
        if !matches!(
            coupon.stage,
            Stage::Created | Stage::Assigned | Stage::RedeemedPendingSettlement
        ) {
            return Err(AppError::InvalidState(
                "Coupon cannot be redeemed in its current stage".to_string(),
            ));
        }

        let today_count = coupon.redemptions_on(now.date_naive()) as i64;
        if today_count >= coupon.fraud_prevention.max_redemptions_per_day {
            return Err(AppError::InvalidState(
                "Daily redemption limit reached for this coupon".to_string(),
            ));
        }

        let amount = coupon.value.redemption_amount(req.purchase_amount.as_ref());
        let partner_id = req.partner_id.or(coupon.partner);

        // Usage recording and stage advance are two explicit steps invoked
        // together here, so neither can drift behind the other.
        coupon.record_redemption(Redemption {
            redeemed_by: user.id,
            redeemed_at: now,
            amount: amount.clone(),
            partner: partner_id,
            location: req.location.clone(),
            notes: req.notes.clone(),
        });
        if coupon.stage != Stage::RedeemedPendingSettlement {
            coupon.record_stage_change(
                Stage::RedeemedPendingSettlement,
                Some(user.id),
                "Coupon redeemed",
            );
        }

        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        // Wallet side is attempted only after the coupon commit and is
        // best-effort from here on.
        if let Some(partner_id) = partner_id {
            if let Err(e) = self
                .apply_redemption_to_wallet(&coupon, partner_id, amount.clone(), user.id)
                .await
            {
                tracing::error!(
                    coupon = %coupon.code,
                    partner = %partner_id,
                    error = %e,
                    "wallet update failed after coupon redemption"
                );
            }
        }

        Ok(RedemptionOutcome { coupon, amount })
    }

    async fn apply_redemption_to_wallet(
        &self,
        coupon: &Coupon,
        partner_id: Uuid,
        amount: BigDecimal,
        redeemed_by: Uuid,
    ) -> Result<(), AppError> {
        let partner = self
            .directory
            .get_partner(partner_id)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let Some(partner) = partner else {
            tracing::warn!(partner = %partner_id, "partner not found in directory, wallet not updated");
            return Ok(());
        };
        let Some(vendor) = partner.linked_user_id else {
            tracing::info!(
                partner = %partner_id,
                "partner has no linked user account, wallet not updated"
            );
            return Ok(());
        };

        self.ensure_wallet(vendor, &coupon.category).await?;

        let mut tx = self.pool.begin().await?;
        let mut wallet = queries::lock_wallet_by_vendor(&mut tx, vendor)
            .await?
            .ok_or_else(|| AppError::Internal("wallet disappeared after creation".to_string()))?;

        if wallet.pending_entry(coupon.id).is_some() {
            wallet
                .redeem_coupon(
                    coupon.id,
                    amount.clone(),
                    Some(redeemed_by),
                    format!("Coupon {} redeemed", coupon.code),
                )
                .map_err(|e| AppError::InvalidState(e.to_string()))?;
            queries::update_wallet(&mut tx, &wallet).await?;
            tx.commit().await?;
        } else {
            tracing::info!(
                coupon = %coupon.code,
                vendor = %vendor,
                "no pending wallet entry for redeemed coupon"
            );
            tx.rollback().await?;
        }

        if let Err(e) = self
            .directory
            .record_partner_redemption(partner_id, &amount)
            .await
        {
            tracing::warn!(partner = %partner_id, error = %e, "partner analytics update failed");
        }

        Ok(())
    }

    // --- Settlement and rejection ---

    pub async fn settle(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &SettleRequest,
    ) -> Result<Coupon, AppError> {
        if let Some(amount) = &req.amount {
            validation::validate_non_negative_amount("amount", amount)?;
        }
        if let Some(reference_no) = &req.reference_no {
            validation::validate_max_len(
                "referenceNo",
                reference_no,
                validation::REFERENCE_NO_MAX_LEN,
            )?;
        }

        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !coupon.stage.allows(Stage::Settled) {
            return Err(AppError::InvalidState(
                "Only redeemed coupons can be settled".to_string(),
            ));
        }

        let payable_amount = req
            .amount
            .clone()
            .or_else(|| coupon.latest_redemption().map(|r| r.amount.clone()))
            .unwrap_or_else(|| BigDecimal::from(0));

        coupon.settlement = Some(crate::domain::coupon::SettlementRecord {
            payable_amount,
            approved_by: user.id,
            reference_no: req.reference_no.clone().unwrap_or_default(),
            paid_on: Utc::now(),
        });
        coupon.record_stage_change(
            Stage::Settled,
            Some(user.id),
            req.notes.clone().unwrap_or_else(|| "Settlement approved".to_string()),
        );

        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    pub async fn reject(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &RejectRequest,
    ) -> Result<Coupon, AppError> {
        let target = match req.mark_as.as_deref() {
            Some("CANCELLED") => Stage::Cancelled,
            _ => Stage::Rejected,
        };

        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !coupon.stage.allows(target) {
            return Err(AppError::InvalidState(
                "Settled coupons cannot be rejected".to_string(),
            ));
        }

        let reason = req
            .reason
            .clone()
            .unwrap_or_else(|| "Rejected by partner/admin".to_string());
        coupon.rejection_reason = Some(reason.clone());
        coupon.status = CouponStatus::Cancelled;
        coupon.record_stage_change(target, Some(user.id), reason);

        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    // --- Deletion and update ---

    pub async fn delete(&self, user: AuthUser, id: Uuid) -> Result<(), AppError> {
        let coupon = queries::get_coupon(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !user.is_admin() && coupon.issuer != user.id {
            return Err(AppError::Forbidden(
                "You do not have permission to delete this coupon".to_string(),
            ));
        }
        if coupon.usage.used_count > 0 {
            return Err(AppError::InvalidState(
                "Cannot delete coupon that has been redeemed. You can deactivate it instead."
                    .to_string(),
            ));
        }

        queries::delete_coupon(&self.pool, id).await?;
        Ok(())
    }

    pub async fn update(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &UpdateCouponRequest,
    ) -> Result<Coupon, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if !user.is_admin() && coupon.issuer != user.id {
            return Err(AppError::Forbidden(
                "You do not have permission to update this coupon".to_string(),
            ));
        }

        if let Some(title) = &req.title {
            validation::validate_required("title", title)?;
            coupon.title = title.clone();
        }
        if let Some(description) = &req.description {
            coupon.description = description.clone();
        }
        if let Some(partner) = req.partner {
            coupon.partner = Some(partner);
        }
        if let Some(beneficiary) = &req.beneficiary {
            coupon.beneficiary = Some(beneficiary.clone());
        }
        if let Some(end_date) = req.end_date {
            coupon.validity.end_date = end_date;
        }
        if let Some(status) = req.status {
            coupon.status = status;
        }
        // Value and category are frozen once the coupon has been used.
        if coupon.usage.used_count == 0 {
            if let Some(value) = &req.value {
                coupon.value = value.clone();
            }
            if let Some(category) = &req.category {
                coupon.category = category.clone();
            }
        }
        coupon.updated_at = Utc::now();

        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        Ok(coupon)
    }

    // --- Wallet intake ---

    async fn ensure_wallet(&self, vendor: Uuid, vendor_type: &str) -> Result<(), AppError> {
        if queries::get_wallet_by_vendor(&self.pool, vendor)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let wallet = Wallet::new(vendor, vendor_type);
        match queries::insert_wallet(&self.pool, &wallet).await {
            Ok(()) => Ok(()),
            // Lost the creation race; the winner's wallet is the one we want.
            Err(e) if is_unique_violation(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers the coupon in the vendor's wallet: a pending tracking entry,
    /// plus a coupon_received credit when the coupon has intrinsic value
    /// (percentage coupons are taken in at zero).
    pub async fn add_coupon_to_wallet(
        &self,
        coupon: &Coupon,
        vendor: Uuid,
        processed_by: Option<Uuid>,
    ) -> Result<Wallet, AppError> {
        self.ensure_wallet(vendor, &coupon.category).await?;

        let mut tx = self.pool.begin().await?;
        let mut wallet = queries::lock_wallet_by_vendor(&mut tx, vendor)
            .await?
            .ok_or_else(|| AppError::Internal("wallet disappeared after creation".to_string()))?;

        if wallet.coupons.iter().any(|c| c.coupon == coupon.id) {
            tx.rollback().await?;
            return Err(AppError::Conflict(
                "Coupon is already tracked in this wallet".to_string(),
            ));
        }

        let value = coupon.monetary_value();
        wallet.add_coupon(coupon.id, value.clone());
        if value > BigDecimal::from(0) {
            wallet.add_transaction(WalletTransaction {
                kind: TransactionKind::CouponReceived,
                amount: value,
                coupon: Some(coupon.id),
                description: format!("Coupon {} received", coupon.code),
                transaction_id: None,
                processed_by,
                processed_at: Utc::now(),
                status: TransactionStatus::Completed,
            });
        }

        queries::update_wallet(&mut tx, &wallet).await?;
        tx.commit().await?;

        Ok(wallet)
    }

    // --- Send ---

    /// Delivers the coupon to a recipient and, when a partner is attached,
    /// registers it in that partner's vendor wallet. Notification dispatch is
    /// fire-and-forget: its failure never rolls back coupon or wallet state.
    pub async fn send(
        &self,
        user: AuthUser,
        id: Uuid,
        req: &SendRequest,
    ) -> Result<(Coupon, ChannelResults), AppError> {
        let mut tx = self.pool.begin().await?;
        let mut coupon = queries::lock_coupon(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        if let Some(partner_id) = req.partner_id {
            coupon.partner = Some(partner_id);
            coupon.status = CouponStatus::Active;
            coupon.updated_at = Utc::now();
        }
        queries::update_coupon(&mut tx, &coupon).await?;
        tx.commit().await?;

        let methods = req.methods.unwrap_or_default();
        let results = match self.notifier.send_coupon(&coupon, &req.recipient, &methods).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(coupon = %coupon.code, error = %e, "coupon notification dispatch failed");
                ChannelResults::default()
            }
        };

        if let Some(partner_id) = coupon.partner {
            match self.directory.get_partner(partner_id).await {
                Ok(Some(partner)) => {
                    if let Some(vendor) = partner.linked_user_id {
                        match self.add_coupon_to_wallet(&coupon, vendor, Some(user.id)).await {
                            Ok(_) => {}
                            Err(AppError::Conflict(_)) => {
                                tracing::info!(
                                    coupon = %coupon.code,
                                    vendor = %vendor,
                                    "coupon already tracked in vendor wallet"
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    coupon = %coupon.code,
                                    error = %e,
                                    "failed to add coupon to vendor wallet"
                                );
                            }
                        }
                    } else {
                        tracing::info!(
                            partner = %partner_id,
                            "partner has no linked user account, wallet not updated"
                        );
                    }
                }
                Ok(None) => {
                    tracing::warn!(partner = %partner_id, "partner not found in directory");
                }
                Err(e) => {
                    tracing::error!(partner = %partner_id, error = %e, "directory lookup failed");
                }
            }
        }

        Ok((coupon, results))
    }
}
