//! # Collaborator Contracts
//!
//! Narrow async traits for the engine's external collaborators.
//!
//! ## Contract Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    External Collaborators                               │
//! │                                                                         │
//! │  SessionManager                                                        │
//! │       │                                                                 │
//! │       ├── ProductCatalog ──── product lookups (pricing mode, rate)     │
//! │       ├── StockLevel ──────── on-hand quantities (fail-open reads)     │
//! │       ├── TaxConfiguration ── per-shop default tax rate                │
//! │       ├── WeightPricing ───── scale validation / rounding / pricing    │
//! │       └── SalePersistence ─── the permanent record Complete writes     │
//! │                                                                         │
//! │  Each contract is the minimum the engine needs; the default adapters   │
//! │  in `adapters` back them with the local SQLite store, and tests swap   │
//! │  in in-memory doubles.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All calls are awaited without holding any other session's lock; they are
//! read-only from the engine's perspective except `SalePersistence`.

use async_trait::async_trait;
use rust_decimal::Decimal;

use meridian_core::money::Money;
use meridian_core::types::{PaymentMethod, Product, Sale, SaleItem, TaxRate};

use crate::error::SessionResult;

/// Product lookups by id.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetches a product, or None when the id is unknown.
    async fn product_by_id(&self, id: &str) -> SessionResult<Option<Product>>;
}

/// Current on-hand stock by product id.
///
/// The engine treats an `Err` from this contract as "source unreachable"
/// and fails open (warning, not a blocker); only an `Ok` carrying an
/// insufficient quantity blocks a sale.
#[async_trait]
pub trait StockLevel: Send + Sync {
    /// On-hand quantity, or None when the product doesn't track inventory.
    async fn on_hand(&self, product_id: &str) -> SessionResult<Option<i64>>;
}

/// Per-shop tax configuration.
#[async_trait]
pub trait TaxConfiguration: Send + Sync {
    /// The shop's default tax rate, or None when the shop has no rate
    /// configured (the engine then applies its fallback rate).
    async fn default_rate(&self, shop_id: &str) -> SessionResult<Option<TaxRate>>;
}

/// Weight validation, rounding, and pricing rules.
///
/// Rounding and pricing are pure; validation may consult an external
/// scale-certification service and is therefore async and fallible.
#[async_trait]
pub trait WeightPricing: Send + Sync {
    /// Whether a raw scale reading is acceptable for this product.
    async fn validate_weight(&self, weight: Decimal, product: &Product) -> SessionResult<bool>;

    /// Rounds a raw reading to the given number of decimal places.
    fn round_weight(&self, weight: Decimal, precision: u32) -> Decimal;

    /// Prices a (rounded) weight for the product.
    fn price_for(&self, product: &Product, weight: Decimal) -> SessionResult<Money>;
}

/// The permanent sale record a completed session commits into.
#[async_trait]
pub trait SalePersistence: Send + Sync {
    /// Creates a pending sale record; returns the sale id.
    async fn create_sale(&self, sale: &Sale) -> SessionResult<String>;

    /// Attaches one item to a pending sale.
    async fn add_item(&self, item: &SaleItem) -> SessionResult<()>;

    /// Records the payment and finalizes the sale; after this the record
    /// is immutable.
    async fn complete_sale(
        &self,
        sale_id: &str,
        payment_method: PaymentMethod,
    ) -> SessionResult<Sale>;
}
