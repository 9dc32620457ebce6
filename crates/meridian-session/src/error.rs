//! # Engine Error Types
//!
//! What callers of the session engine see.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  ValidationError ──┐                                                   │
//! │                    ├──► CoreError ──┐                                  │
//! │  Grid invariants ──┘                ├──► SessionError ──► Caller       │
//! │                                     │                                   │
//! │  sqlx::Error ──► DbError ───────────┘                                  │
//! │                                                                         │
//! │  Every mutating operation returns Result<Session, SessionError>:       │
//! │  success carries the freshly recomputed totals, failure carries a      │
//! │  typed reason, and the stored session stays at its last committed      │
//! │  state either way.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use meridian_core::error::{CoreError, ValidationError};
use meridian_db::DbError;

/// Errors returned by session engine operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Input rejected before any mutation; zero side effects.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Session, item, or referenced product absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An open session with this tab name already exists for the
    /// (user, device). Raised at creation time only.
    #[error("Tab '{tab_name}' is already open on this device")]
    DuplicateTabName { tab_name: String },

    /// The (user, device) already holds the configured maximum of open
    /// sessions. Raised at creation time only.
    #[error("Open session limit reached: {max} tabs already open on this device")]
    ConcurrencyLimitExceeded { max: usize },

    /// A mutation was attempted against a session already in a terminal
    /// state, or one that reached a terminal state while the mutation was
    /// in flight.
    #[error("Session {session_id} is {state}: no further mutation permitted")]
    StaleSession { session_id: String, state: String },

    /// Stock is confirmed insufficient. An *unreachable* stock source
    /// never raises this: the engine fails open with a warning instead.
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// Completion requires at least one surviving line item.
    #[error("Session {session_id} has no items to complete")]
    EmptySession { session_id: String },

    /// An external collaborator (catalog, stock, tax, weight validation,
    /// sale persistence) failed or was unreachable.
    #[error("{service} collaborator failed: {message}")]
    Collaborator { service: String, message: String },

    /// A remaining business-rule violation from the core (wrong pricing
    /// entry point, missing rate, grid caps, illegal transition).
    #[error(transparent)]
    Domain(CoreError),

    /// Underlying store failure; the session is left at its last
    /// successfully-committed state.
    #[error("Persistence failed: {0}")]
    Db(DbError),
}

impl SessionError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SessionError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Collaborator error.
    pub fn collaborator(service: impl Into<String>, message: impl Into<String>) -> Self {
        SessionError::Collaborator {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Core errors keep their specific engine-level meaning where the caller
/// is expected to branch on it; the rest stay transparent domain errors.
impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => SessionError::Validation(e),
            CoreError::StaleSession { session_id, state } => {
                SessionError::StaleSession { session_id, state }
            }
            CoreError::EmptySession { session_id } => SessionError::EmptySession { session_id },
            CoreError::ProductNotFound(id) => SessionError::not_found("Product", id),
            CoreError::ItemNotFound { item_id, .. } => SessionError::not_found("Item", item_id),
            CoreError::InsufficientStock {
                sku,
                available,
                requested,
            } => SessionError::InsufficientStock {
                sku,
                available,
                requested,
            },
            other => SessionError::Domain(other),
        }
    }
}

impl From<DbError> for SessionError {
    fn from(err: DbError) -> Self {
        SessionError::Db(err)
    }
}

/// Result type for engine operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Unit Tests
// =============================================================================
