//! Static coupon package catalog.
//! Templates are defined at process start and never mutated; every purchase
//! copies fields out of the template into a fresh coupon.

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::domain::coupon::CouponKind;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponPackage {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    #[serde(rename = "type")]
    pub kind: CouponKind,
    pub amount: i64,
    pub currency: &'static str,
    pub validity_days: i64,
    pub max_uses: i64,
    pub is_unlimited: bool,
    pub max_redemptions_per_day: i64,
    pub partner_categories: &'static [&'static str],
    pub code_prefix: &'static str,
}

impl CouponPackage {
    pub fn amount_decimal(&self) -> BigDecimal {
        BigDecimal::from(self.amount)
    }
}

pub const COUPON_PACKAGES: &[CouponPackage] = &[
    CouponPackage {
        id: "FOOD_100",
        title: "Food Coupon – ₹100",
        description: "Redeem a ₹100 food voucher at any partner restaurant or food server. Valid for one meal.",
        category: "food",
        kind: CouponKind::Discount,
        amount: 100,
        currency: "INR",
        validity_days: 30,
        max_uses: 1,
        is_unlimited: false,
        max_redemptions_per_day: 1,
        partner_categories: &["food", "food_server", "restaurant"],
        code_prefix: "FOOD",
    },
    CouponPackage {
        id: "HEALTH_500",
        title: "Health Checkup – ₹500",
        description: "Cover diagnostics and consultation up to ₹500 at verified health partners.",
        category: "medical",
        kind: CouponKind::Discount,
        amount: 500,
        currency: "INR",
        validity_days: 60,
        max_uses: 1,
        is_unlimited: false,
        max_redemptions_per_day: 1,
        partner_categories: &["medical", "pathology_lab", "hospital"],
        code_prefix: "HEAL",
    },
];

/// Read-only lookup; `None` for unknown ids.
pub fn package_by_id(id: &str) -> Option<&'static CouponPackage> {
    if id.is_empty() {
        return None;
    }
    COUPON_PACKAGES.iter().find(|pkg| pkg.id == id)
}

pub fn all_packages() -> &'static [CouponPackage] {
    COUPON_PACKAGES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_known_package() {
        let pkg = package_by_id("FOOD_100").expect("FOOD_100 is in the catalog");
        assert_eq!(pkg.amount, 100);
        assert_eq!(pkg.validity_days, 30);
        assert_eq!(pkg.code_prefix, "FOOD");
    }

    #[test]
    fn unknown_package_is_none() {
        assert!(package_by_id("GONE_999").is_none());
        assert!(package_by_id("").is_none());
    }

    #[test]
    fn health_package_values() {
        let pkg = package_by_id("HEALTH_500").unwrap();
        assert_eq!(pkg.amount_decimal(), BigDecimal::from(500));
        assert_eq!(pkg.validity_days, 60);
        assert_eq!(pkg.max_uses, 1);
        assert!(!pkg.is_unlimited);
    }
}
