//! # Sale Repository
//!
//! Database operations for the permanent sale records sessions commit into.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── insert_sale() → Sale { status: Pending }                       │
//! │                                                                         │
//! │  2. ATTACH ITEMS                                                       │
//! │     └── add_item() → SaleItem  (surviving session lines only)          │
//! │                                                                         │
//! │  3. COMPLETE                                                           │
//! │     └── complete_sale() → Sale { status: Completed }                   │
//! │         After this the record is immutable.                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::types::{PaymentMethod, Sale, SaleItem};

fn row_to_sale(row: &SqliteRow) -> DbResult<Sale> {
    Ok(Sale {
        id: row.try_get("id")?,
        invoice_ref: row.try_get("invoice_ref")?,
        status: row.try_get("status")?,
        shop_id: row.try_get("shop_id")?,
        subtotal_cents: row.try_get("subtotal_cents")?,
        discount_cents: row.try_get("discount_cents")?,
        tax_cents: row.try_get("tax_cents")?,
        total_cents: row.try_get("total_cents")?,
        payment_method: row.try_get("payment_method")?,
        user_id: row.try_get("user_id")?,
        device_id: row.try_get("device_id")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_sale_item(row: &SqliteRow) -> DbResult<SaleItem> {
    let id: String = row.try_get("id")?;
    let quantity_text: String = row.try_get("quantity")?;
    let quantity = Decimal::from_str(&quantity_text)
        .map_err(|e| DbError::Internal(format!("sale item {id} quantity: {e}")))?;

    Ok(SaleItem {
        id,
        sale_id: row.try_get("sale_id")?,
        product_id: row.try_get("product_id")?,
        sku_snapshot: row.try_get("sku_snapshot")?,
        name_snapshot: row.try_get("name_snapshot")?,
        quantity,
        unit_price_cents: row.try_get("unit_price_cents")?,
        line_total_cents: row.try_get("line_total_cents")?,
        discount_cents: row.try_get("discount_cents")?,
        tax_cents: row.try_get("tax_cents")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn fetch(&self, id: &str) -> DbResult<Option<Sale>> {
        let row = sqlx::query(
            "SELECT id, invoice_ref, status, shop_id, subtotal_cents, discount_cents, \
                    tax_cents, total_cents, payment_method, user_id, device_id, \
                    created_at, completed_at \
             FROM sales WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_sale).transpose()
    }

    /// Inserts a pending sale record.
    pub async fn insert_sale(&self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, invoice_ref = %sale.invoice_ref, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, invoice_ref, status, shop_id,
                subtotal_cents, discount_cents, tax_cents, total_cents,
                payment_method, user_id, device_id,
                created_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.invoice_ref)
        .bind(sale.status)
        .bind(&sale.shop_id)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.payment_method)
        .bind(&sale.user_id)
        .bind(&sale.device_id)
        .bind(sale.created_at)
        .bind(sale.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Attaches an item to a sale.
    ///
    /// ## Snapshot Pattern
    /// Product details (sku, name, price) are frozen on the sale item so
    /// the record survives later catalog edits.
    pub async fn add_item(&self, item: &SaleItem) -> DbResult<()> {
        debug!(sale_id = %item.sale_id, product_id = %item.product_id, "Adding sale item");

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id,
                sku_snapshot, name_snapshot, quantity,
                unit_price_cents, line_total_cents, discount_cents, tax_cents,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.quantity.to_string())
        .bind(item.unit_price_cents)
        .bind(item.line_total_cents)
        .bind(item.discount_cents)
        .bind(item.tax_cents)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets all items for a sale.
    pub async fn fetch_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let rows = sqlx::query(
            "SELECT id, sale_id, product_id, sku_snapshot, name_snapshot, quantity, \
                    unit_price_cents, line_total_cents, discount_cents, tax_cents, created_at \
             FROM sale_items WHERE sale_id = ?1 ORDER BY created_at",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sale_item).collect()
    }

    /// Finalizes a sale: records the payment method and flips it to
    /// `Completed`. A sale can only be completed once.
    pub async fn complete_sale(
        &self,
        sale_id: &str,
        payment_method: PaymentMethod,
        completed_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = 'completed',
                payment_method = ?2,
                completed_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(sale_id)
        .bind(payment_method)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (pending)", sale_id));
        }

        Ok(())
    }
}

/// Generates an invoice reference in format: YYYYMMDD-DD-NNNN
///
/// ## Format
/// - YYYYMMDD: Date
/// - DD: Device code (last 2 chars of device_id)
/// - NNNN: Sequence suffix (padded to 4 digits)
///
/// ## Example
/// `20260804-01-0421`
pub fn generate_invoice_ref(device_id: &str) -> String {
    let now = Utc::now();
    let date_part = now.format("%Y%m%d");

    // Last 2 characters of the device ID, or "00"
    let device_code: String = device_id
        .chars()
        .rev()
        .take(2)
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    let device_code = if device_code.len() < 2 {
        "00".to_string()
    } else {
        device_code
    };

    let seq = (now.timestamp_millis() % 10000) as u32;

    format!("{}-{}-{:04}", date_part, device_code, seq)
}

/// Generates a new sale ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new sale item ID.
pub fn generate_sale_item_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
