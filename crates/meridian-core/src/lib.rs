//! # meridian-core: Pure Business Logic for Meridian POS
//!
//! This crate is the **heart** of Meridian POS. It contains all business
//! logic as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Meridian POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                meridian-session (Engine)                        │   │
//! │  │    create_session, add_unit_item, complete, cleanup_expired     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ meridian-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  session  │  │ lifecycle │  │   │
//! │  │   │  Product  │  │   Money   │  │   Grid    │  │  5-state  │  │   │
//! │  │   │   Sale    │  │  TaxCalc  │  │  Totals   │  │  machine  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  meridian-db (Database Layer)                   │   │
//! │  │           SQLite queries, migrations, repositories              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, TaxRate, etc.)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`weight`] - Weight rounding and weight-priced amounts
//! - [`session`] - The session grid: line items, tombstones, totals
//! - [`lifecycle`] - The session state machine
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are cents (i64); weights are
//!    `rust_decimal::Decimal` kilograms
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//! 5. **Half away from zero**: the single rounding rule at every site

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lifecycle;
pub mod money;
pub mod session;
pub mod types;
pub mod validation;
pub mod weight;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use meridian_core::Money` instead of
// `use meridian_core::money::Money`

pub use error::{CoreError, CoreResult, ValidationError};
pub use lifecycle::SessionState;
pub use money::Money;
pub use session::{LineItem, Pricing, Session, SessionTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default cap on simultaneous open (Active/Suspended) sessions per
/// (user, device).
///
/// ## Business Reason
/// A cashier juggling more than a handful of tabs is almost always a
/// mis-tap; the cap keeps a runaway device from flooding the store.
/// Configurable per engine instance.
pub const DEFAULT_MAX_OPEN_SESSIONS: usize = 5;

/// Maximum live line items in a single session grid.
pub const MAX_SESSION_ITEMS: usize = 100;

/// Maximum quantity of a single unit-priced line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum plausible scale reading in kilograms.
pub const MAX_WEIGHT_KG: i64 = 1000;

/// Maximum tab name length in characters.
pub const MAX_TAB_NAME_LEN: usize = 60;
