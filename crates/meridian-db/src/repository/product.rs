//! # Product Repository
//!
//! Database operations for the sellable catalog.
//!
//! ## Role in the Engine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Catalog Reads in the Session Engine                  │
//! │                                                                         │
//! │  add_unit_item / add_weight_item                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ProductRepository::fetch(product_id)                                  │
//! │       │                                                                 │
//! │       ├── is_weight_based? ──► decides which entry point is legal      │
//! │       ├── price / rate_per_kg ──► frozen onto the line item            │
//! │       └── weight_precision ──► scale reading rounding                  │
//! │                                                                         │
//! │  Stock checks read stock_level() separately; the engine treats an      │
//! │  unreachable stock source as a warning, not a blocker.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use meridian_core::types::Product;

fn row_to_product(row: &SqliteRow) -> DbResult<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        barcode: row.try_get("barcode")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price_cents: row.try_get("price_cents")?,
        is_weight_based: row.try_get("is_weight_based")?,
        rate_per_kg_cents: row.try_get("rate_per_kg_cents")?,
        weight_precision: row.try_get("weight_precision")?,
        track_inventory: row.try_get("track_inventory")?,
        allow_negative_stock: row.try_get("allow_negative_stock")?,
        current_stock: row.try_get("current_stock")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const PRODUCT_COLUMNS: &str = "id, sku, barcode, name, description, price_cents, \
     is_weight_based, rate_per_kg_cents, weight_precision, track_inventory, \
     allow_negative_stock, current_stock, is_active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn fetch(&self, id: &str) -> DbResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    /// Inserts a product. Used by seeding and tests; the catalog itself is
    /// maintained by an external system.
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, barcode, name, description, price_cents,
                is_weight_based, rate_per_kg_cents, weight_precision,
                track_inventory, allow_negative_stock, current_stock,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.barcode)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(product.is_weight_based)
        .bind(product.rate_per_kg_cents)
        .bind(product.weight_precision)
        .bind(product.track_inventory)
        .bind(product.allow_negative_stock)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Current on-hand quantity for a product, or None when the product is
    /// unknown or doesn't track inventory.
    pub async fn stock_level(&self, product_id: &str) -> DbResult<Option<i64>> {
        let stock: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT current_stock FROM products WHERE id = ?1 AND track_inventory = 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stock.flatten())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
