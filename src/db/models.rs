//! Row types for the document tables. Scalar columns exist for indexing and
//! uniqueness; the JSONB `doc` column carries the entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::coupon::Coupon;
use crate::domain::wallet::Wallet;

#[derive(Debug, FromRow)]
pub struct CouponRecord {
    pub id: Uuid,
    pub code: String,
    pub doc: Json<Coupon>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponRecord {
    pub fn into_coupon(self) -> Coupon {
        self.doc.0
    }
}

#[derive(Debug, FromRow)]
pub struct WalletRecord {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub doc: Json<Wallet>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletRecord {
    /// The transaction log is the source of truth; the cached totals are a
    /// projection. Drift is surfaced at load time, not silently corrected.
    pub fn into_wallet(self) -> Wallet {
        let wallet = self.doc.0;
        let totals = wallet.recomputed_totals();
        if totals.balance != wallet.current_balance
            || totals.received != wallet.total_received
            || totals.redeemed != wallet.total_redeemed
            || totals.settled != wallet.total_settled
        {
            tracing::warn!(
                wallet_id = %wallet.id,
                vendor = %wallet.vendor,
                "cached wallet totals drift from the transaction log"
            );
        }
        wallet
    }
}
