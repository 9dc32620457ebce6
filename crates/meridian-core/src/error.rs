//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  meridian-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  meridian-session errors (engine crate)                                │
//! │  └── SessionError     - What callers of the engine see                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SessionError → Caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, state, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They should be caught and translated to user-friendly messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Line item cannot be found in the session grid (or was already
    /// tombstoned).
    #[error("Item {item_id} not found in session {session_id}")]
    ItemNotFound {
        session_id: String,
        item_id: String,
    },

    /// Insufficient stock to complete the operation.
    ///
    /// ## When This Occurs
    /// - Trying to sell more than available stock
    /// - Product has track_inventory=true and allow_negative_stock=false
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// A mutation was attempted against a session in a terminal state.
    ///
    /// ## When This Occurs
    /// - Adding items to a completed session
    /// - Suspending a cancelled session
    /// - Any write racing an expiry sweep that already won
    #[error("Session {session_id} is {state}: no further mutation permitted")]
    StaleSession { session_id: String, state: String },

    /// The requested lifecycle transition has no edge in the state machine.
    #[error("Session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    /// Completion requires at least one surviving line item.
    #[error("Session {session_id} has no items to complete")]
    EmptySession { session_id: String },

    /// A weight-based product was pushed through the unit-priced entry point.
    #[error("{sku} is weight-priced: use the weight-based entry point")]
    WeightBasedProduct { sku: String },

    /// A unit-priced product was pushed through the weight-based entry point.
    #[error("{sku} is unit-priced: use the unit-priced entry point")]
    UnitPricedProduct { sku: String },

    /// A weight-based product is missing its per-kilogram rate.
    #[error("{sku} has no rate per kilogram configured")]
    MissingRate { sku: String },

    /// The session grid has exceeded the maximum allowed live items.
    #[error("Session cannot have more than {max} items")]
    GridTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// A line discount larger than the line's pre-discount subtotal.
    #[error("discount {discount_cents} exceeds line subtotal {subtotal_cents}")]
    DiscountExceedsLine {
        discount_cents: i64,
        subtotal_cents: i64,
    },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "COKE-330".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for COKE-330: available 3, requested 5"
        );

        let err = CoreError::StaleSession {
            session_id: "s-1".to_string(),
            state: "completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Session s-1 is completed: no further mutation permitted"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "tab_name".to_string(),
        };
        assert_eq!(err.to_string(), "tab_name is required");

        let err = ValidationError::DiscountExceedsLine {
            discount_cents: 500,
            subtotal_cents: 300,
        };
        assert_eq!(err.to_string(), "discount 500 exceeds line subtotal 300");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "tab_name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
