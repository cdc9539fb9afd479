use bigdecimal::BigDecimal;
use std::fmt;

pub const CODE_MAX_LEN: usize = 24;
pub const CURRENCY_CODE_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 120;
pub const NOTES_MAX_LEN: usize = 500;
pub const REFERENCE_NO_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Coupon codes are uppercase alphanumerics with an optional short prefix.
pub fn validate_coupon_code(code: &str) -> ValidationResult {
    let code = sanitize_string(code);
    validate_required("code", &code)?;
    validate_max_len("code", &code, CODE_MAX_LEN)?;

    if !code
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    {
        return Err(ValidationError::new(
            "code",
            "must contain only letters, digits and dashes",
        ));
    }

    Ok(())
}

pub fn validate_currency_code(currency: &str) -> ValidationResult {
    let currency = sanitize_string(currency);
    validate_required("currency", &currency)?;

    if currency.len() != CURRENCY_CODE_LEN
        || !currency.chars().all(|ch| ch.is_ascii_uppercase())
    {
        return Err(ValidationError::new(
            "currency",
            "must be a 3-letter uppercase code",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_non_negative_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}

/// Percentages are meaningful only in (0, 100].
pub fn validate_percentage(percent: &BigDecimal) -> ValidationResult {
    if percent <= &BigDecimal::from(0) || percent > &BigDecimal::from(100) {
        return Err(ValidationError::new(
            "percent",
            "must be between 0 and 100",
        ));
    }

    Ok(())
}
