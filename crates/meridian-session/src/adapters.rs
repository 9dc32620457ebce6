//! # Default Collaborator Adapters
//!
//! SQLite-backed implementations of the collaborator contracts, plus the
//! pure defaults (`FixedTaxConfig`, `ScaleRules`). Each adapter delegates
//! to the matching repository through the shared `Database` handle.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use meridian_core::money::Money;
use meridian_core::types::{PaymentMethod, Product, Sale, SaleItem, TaxRate};
use meridian_core::weight;
use meridian_db::Database;

use crate::error::{SessionError, SessionResult};
use crate::traits::{ProductCatalog, SalePersistence, StockLevel, TaxConfiguration, WeightPricing};

// =============================================================================
// SQLite Catalog
// =============================================================================

/// Catalog reads backed by the local products table.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db: Database) -> Self {
        SqliteCatalog { db }
    }
}

#[async_trait]
impl ProductCatalog for SqliteCatalog {
    async fn product_by_id(&self, id: &str) -> SessionResult<Option<Product>> {
        Ok(self.db.products().fetch(id).await?)
    }
}

// =============================================================================
// SQLite Stock
// =============================================================================

/// Stock reads backed by the local products table.
#[derive(Debug, Clone)]
pub struct SqliteStock {
    db: Database,
}

impl SqliteStock {
    pub fn new(db: Database) -> Self {
        SqliteStock { db }
    }
}

#[async_trait]
impl StockLevel for SqliteStock {
    async fn on_hand(&self, product_id: &str) -> SessionResult<Option<i64>> {
        Ok(self.db.products().stock_level(product_id).await?)
    }
}

// =============================================================================
// Fixed Tax Configuration
// =============================================================================

/// A tax configuration that answers the same rate for every shop.
///
/// Stands in for the tenant tax service in single-shop deployments and
/// tests; the engine still applies its own fallback when constructed with
/// no rate.
#[derive(Debug, Clone)]
pub struct FixedTaxConfig {
    rate: Option<TaxRate>,
}

impl FixedTaxConfig {
    /// Answers `rate` for every shop.
    pub fn new(rate: TaxRate) -> Self {
        FixedTaxConfig { rate: Some(rate) }
    }

    /// Answers "no rate configured" for every shop.
    pub fn unconfigured() -> Self {
        FixedTaxConfig { rate: None }
    }
}

#[async_trait]
impl TaxConfiguration for FixedTaxConfig {
    async fn default_rate(&self, _shop_id: &str) -> SessionResult<Option<TaxRate>> {
        Ok(self.rate)
    }
}

// =============================================================================
// Scale Rules
// =============================================================================

/// The default weight-pricing rules: pure arithmetic from the core, no
/// external scale service involved.
#[derive(Debug, Clone, Default)]
pub struct ScaleRules;

#[async_trait]
impl WeightPricing for ScaleRules {
    async fn validate_weight(&self, weight: Decimal, _product: &Product) -> SessionResult<bool> {
        Ok(weight::validate_weight(weight).is_ok())
    }

    fn round_weight(&self, weight: Decimal, precision: u32) -> Decimal {
        weight::round_weight(weight, precision)
    }

    fn price_for(&self, product: &Product, weight: Decimal) -> SessionResult<Money> {
        let rate = product
            .rate_per_kg()
            .ok_or_else(|| SessionError::Domain(meridian_core::CoreError::MissingRate {
                sku: product.sku.clone(),
            }))?;
        Ok(weight::price_for_weight(rate, weight))
    }
}

// =============================================================================
// SQLite Sale Persistence
// =============================================================================

/// Sale persistence backed by the local sales tables.
#[derive(Debug, Clone)]
pub struct SqliteSales {
    db: Database,
}

impl SqliteSales {
    pub fn new(db: Database) -> Self {
        SqliteSales { db }
    }
}

#[async_trait]
impl SalePersistence for SqliteSales {
    async fn create_sale(&self, sale: &Sale) -> SessionResult<String> {
        self.db.sales().insert_sale(sale).await?;
        Ok(sale.id.clone())
    }

    async fn add_item(&self, item: &SaleItem) -> SessionResult<()> {
        Ok(self.db.sales().add_item(item).await?)
    }

    async fn complete_sale(
        &self,
        sale_id: &str,
        payment_method: PaymentMethod,
    ) -> SessionResult<Sale> {
        self.db
            .sales()
            .complete_sale(sale_id, payment_method, Utc::now())
            .await?;

        self.db
            .sales()
            .fetch(sale_id)
            .await?
            .ok_or_else(|| SessionError::not_found("Sale", sale_id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
