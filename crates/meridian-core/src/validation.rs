//! # Validation Module
//!
//! Input validation utilities for Meridian POS.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Engine operation (meridian-session)                          │
//! │  ├── THIS MODULE: field validation before any mutation                 │
//! │  └── Rejected input has zero side effects                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Grid invariants (session.rs)                                 │
//! │  ├── Pricing-mode checks, discount bounds, item caps                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── Partial UNIQUE tab index                                          │
//! │  └── Foreign key constraints                                           │
//! │                                                                         │
//! │  Defense in depth: multiple layers catch different errors              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_ITEM_QUANTITY, MAX_TAB_NAME_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a session tab name.
///
/// ## Rules
/// - Must not be empty (after trimming)
/// - Must be at most `MAX_TAB_NAME_LEN` characters
///
/// ## Returns
/// The trimmed tab name.
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_tab_name;
///
/// assert_eq!(validate_tab_name("  Table 4 ").unwrap(), "Table 4");
/// assert!(validate_tab_name("").is_err());
/// assert!(validate_tab_name("   ").is_err());
/// ```
pub fn validate_tab_name(name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "tab_name".to_string(),
        });
    }

    if name.chars().count() > MAX_TAB_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "tab_name".to_string(),
            max: MAX_TAB_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
///
/// Quantity zero is NOT valid input here: callers that want "zero means
/// remove" semantics dispatch to removal before validating.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (free items)
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "price".to_string(),
        });
    }

    Ok(())
}

/// Validates a line discount against the line's pre-discount subtotal.
///
/// ## Rules
/// - Must be non-negative
/// - Must not exceed the gross line subtotal
pub fn validate_discount(discount: Money, gross: Money) -> ValidationResult<()> {
    if discount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "discount".to_string(),
        });
    }

    if discount > gross {
        return Err(ValidationError::DiscountExceedsLine {
            discount_cents: discount.cents(),
            subtotal_cents: gross.cents(),
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
