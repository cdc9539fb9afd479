//! Vendor wallet: cached running totals over an append-only transaction
//! ledger, plus a per-coupon tracking list that guards against redeeming the
//! same coupon into a wallet twice.
//!
//! The ledger is the source of truth; the cached totals are a projection.
//! Two mutation paths exist and must not be mixed: `add_transaction` applies
//! the uniform reducer (topups, intake credits, settlements, adjustments),
//! while `redeem_coupon` applies the redemption tie-break and appends its own
//! audit entry. Redemptions never go through `add_transaction` directly.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Coupon not found in wallet or already redeemed")]
    CouponNotPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Topup,
    CouponReceived,
    CouponRedeemed,
    Settlement,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponEntryStatus {
    Pending,
    Redeemed,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<Uuid>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponEntry {
    pub coupon: Uuid,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Intake value until redemption, then the redeemed amount. Zero intake
    /// value marks a percentage coupon, which the balance tie-break in
    /// `redeem_coupon` keys off.
    pub redeemed_amount: BigDecimal,
    pub status: CouponEntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSettlement {
    pub date: DateTime<Utc>,
    pub amount: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Running totals reduced from the transaction log.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTotals {
    pub balance: BigDecimal,
    pub received: BigDecimal,
    pub redeemed: BigDecimal,
    pub settled: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub vendor: Uuid,
    pub vendor_type: String,
    pub current_balance: BigDecimal,
    pub total_received: BigDecimal,
    pub total_redeemed: BigDecimal,
    pub total_settled: BigDecimal,
    pub transactions: Vec<WalletTransaction>,
    pub coupons: Vec<CouponEntry>,
    pub status: WalletStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_settlement: Option<LastSettlement>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(vendor: Uuid, vendor_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vendor,
            vendor_type: vendor_type.into(),
            current_balance: BigDecimal::from(0),
            total_received: BigDecimal::from(0),
            total_redeemed: BigDecimal::from(0),
            total_settled: BigDecimal::from(0),
            transactions: Vec::new(),
            coupons: Vec::new(),
            status: WalletStatus::Active,
            last_settlement: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Uniform ledger reducer: topup / coupon_received credit the balance,
    /// coupon_redeemed and settlement debit it, feeding total_redeemed and
    /// total_settled respectively. Adjustments are ledger-only.
    ///
    /// Coupon redemptions must go through `redeem_coupon` instead, which
    /// carries the intake tie-break this uniform rule cannot express.
    pub fn add_transaction(&mut self, tx: WalletTransaction) {
        match tx.kind {
            TransactionKind::Topup | TransactionKind::CouponReceived => {
                self.current_balance += &tx.amount;
                self.total_received += &tx.amount;
            }
            TransactionKind::CouponRedeemed => {
                self.current_balance -= &tx.amount;
                self.total_redeemed += &tx.amount;
            }
            TransactionKind::Settlement => {
                self.current_balance -= &tx.amount;
                self.total_settled += &tx.amount;
            }
            TransactionKind::Adjustment => {}
        }
        self.updated_at = tx.processed_at;
        self.transactions.push(tx);
    }

    /// Registers a coupon as pending in this wallet. Does not move balance;
    /// the credit happens when the intake flow appends a coupon_received
    /// transaction (only done for coupons with intrinsic value).
    pub fn add_coupon(&mut self, coupon: Uuid, value: BigDecimal) {
        let now = Utc::now();
        self.coupons.push(CouponEntry {
            coupon,
            received_at: now,
            redeemed_at: None,
            redeemed_amount: value,
            status: CouponEntryStatus::Pending,
        });
        self.updated_at = now;
    }

    pub fn pending_entry(&self, coupon: Uuid) -> Option<&CouponEntry> {
        self.coupons
            .iter()
            .find(|c| c.coupon == coupon && c.status == CouponEntryStatus::Pending)
    }

    /// Marks the pending entry redeemed, updates totals, and appends the
    /// coupon_redeemed audit entry to the ledger.
    ///
    /// total_redeemed always grows by `amount`. The balance is debited ONLY
    /// when the entry was credited at intake (intake value > 0, i.e. a
    /// fixed-amount coupon). Percentage coupons never inflated the balance,
    /// so redemption must not deflate it; that money moves via a later admin
    /// settlement transaction instead. The ledger entry is pushed directly —
    /// running it through `add_transaction` would apply the debit a second
    /// time.
    pub fn redeem_coupon(
        &mut self,
        coupon: Uuid,
        amount: BigDecimal,
        processed_by: Option<Uuid>,
        description: impl Into<String>,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        let entry = self
            .coupons
            .iter_mut()
            .find(|c| c.coupon == coupon && c.status == CouponEntryStatus::Pending)
            .ok_or(LedgerError::CouponNotPending)?;

        let was_in_balance = entry.redeemed_amount > BigDecimal::from(0);
        entry.redeemed_at = Some(now);
        entry.redeemed_amount = amount.clone();
        entry.status = CouponEntryStatus::Redeemed;

        self.total_redeemed += &amount;
        if was_in_balance {
            self.current_balance -= &amount;
        }

        self.transactions.push(WalletTransaction {
            kind: TransactionKind::CouponRedeemed,
            amount,
            coupon: Some(coupon),
            description: description.into(),
            transaction_id: None,
            processed_by,
            processed_at: now,
            status: TransactionStatus::Completed,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Reduces the transaction log from scratch. A coupon_redeemed entry
    /// debits the balance only when the log also carries a coupon_received
    /// credit for the same coupon — the log alone reproduces the intake
    /// tie-break. The load path compares this against the cached columns and
    /// logs a warning on drift.
    pub fn recomputed_totals(&self) -> LedgerTotals {
        let credited: HashSet<Uuid> = self
            .transactions
            .iter()
            .filter(|tx| tx.kind == TransactionKind::CouponReceived)
            .filter_map(|tx| tx.coupon)
            .collect();

        let mut totals = LedgerTotals {
            balance: BigDecimal::from(0),
            received: BigDecimal::from(0),
            redeemed: BigDecimal::from(0),
            settled: BigDecimal::from(0),
        };
        for tx in &self.transactions {
            match tx.kind {
                TransactionKind::Topup | TransactionKind::CouponReceived => {
                    totals.balance += &tx.amount;
                    totals.received += &tx.amount;
                }
                TransactionKind::CouponRedeemed => {
                    totals.redeemed += &tx.amount;
                    let affects_balance = tx.coupon.map_or(true, |id| credited.contains(&id));
                    if affects_balance {
                        totals.balance -= &tx.amount;
                    }
                }
                TransactionKind::Settlement => {
                    totals.balance -= &tx.amount;
                    totals.settled += &tx.amount;
                }
                TransactionKind::Adjustment => {}
            }
        }
        totals
    }

    pub fn totals_in_sync(&self) -> bool {
        let totals = self.recomputed_totals();
        totals.balance == self.current_balance
            && totals.received == self.total_received
            && totals.redeemed == self.total_redeemed
            && totals.settled == self.total_settled
    }

    /// `current_balance == total_received - total_redeemed - total_settled`.
    /// Holds across `add_transaction` sequences; percentage redemptions are
    /// the sanctioned exception.
    pub fn balance_identity_holds(&self) -> bool {
        self.current_balance
            == &self.total_received - &self.total_redeemed - &self.total_settled
    }
}
