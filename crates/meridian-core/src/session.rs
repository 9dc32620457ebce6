//! # Session Grid
//!
//! The editable heart of a sale tab: line items plus their live totals.
//!
//! ## Grid Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Session Grid Operations                              │
//! │                                                                         │
//! │  Engine Operation          Grid Change                                  │
//! │  ────────────────          ───────────                                  │
//! │                                                                         │
//! │  add_unit_item() ────────► merge into live line, or push new           │
//! │                                                                         │
//! │  add_weight_item() ──────► replace weight on live line, or push new    │
//! │                                                                         │
//! │  update_quantity(0) ─────► dispatches to remove_item()                 │
//! │                                                                         │
//! │  remove_item() ──────────► tombstone (kept for audit, out of totals)   │
//! │                                                                         │
//! │  recalculate(rate) ──────► fold surviving lines into SessionTotals     │
//! │                                                                         │
//! │  INVARIANT: at most one live line per product. Adding an already-      │
//! │  present product merges (quantity += / weight replaced) instead of     │
//! │  duplicating the line.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Totals are **derived, never authoritative**: `recalculate` is the only
//! writer of `SessionTotals`, and it reads nothing but the surviving lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{ensure_mutable, SessionState};
use crate::money::Money;
use crate::types::{PaymentMethod, Product, TaxRate};
use crate::validation::{validate_discount, validate_price_cents, validate_quantity};
use crate::weight::{price_for_weight, round_weight, validate_weight};
use crate::{MAX_ITEM_QUANTITY, MAX_SESSION_ITEMS};

// =============================================================================
// Pricing
// =============================================================================

/// How a line item is priced.
///
/// A line is exactly one of the two: the sum type makes "both quantity and
/// weight set" unrepresentable instead of a runtime check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Pricing {
    /// Counted items: integer quantity at a unit price.
    Unit { quantity: i64, unit_price: Money },
    /// Weighed items: kilograms at a per-kilogram rate.
    Weight { weight: Decimal, rate_per_kg: Money },
}

impl Pricing {
    /// Gross line subtotal before any discount.
    ///
    /// Unit lines are exact in cents; weight lines round half away from
    /// zero at the cent.
    pub fn gross(&self) -> Money {
        match self {
            Pricing::Unit {
                quantity,
                unit_price,
            } => unit_price.multiply_quantity(*quantity),
            Pricing::Weight {
                weight,
                rate_per_kg,
            } => price_for_weight(*rate_per_kg, *weight),
        }
    }

    #[inline]
    pub const fn is_unit(&self) -> bool {
        matches!(self, Pricing::Unit { .. })
    }

    #[inline]
    pub const fn is_weight(&self) -> bool {
        matches!(self, Pricing::Weight { .. })
    }
}

// =============================================================================
// Line Item
// =============================================================================

/// One product entry in a session grid.
///
/// ## Design Notes
/// - `product_id`: reference to the product (for stock checks, completion)
/// - `sku`/`name`: frozen copies at time of adding, so the tab displays
///   consistent data even if the catalog changes underneath it
/// - `removed`/`removed_at`: tombstone. Removed lines stay in the grid for
///   audit but are excluded from every recalculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Line identifier (UUID v4).
    pub id: String,

    /// Product ID (UUID).
    pub product_id: String,

    /// SKU at time of adding (frozen).
    pub sku: String,

    /// Product name at time of adding (frozen).
    pub name: String,

    /// Unit or weight pricing for this line.
    pub pricing: Pricing,

    /// Line discount, subtracted from the gross subtotal.
    pub discount: Money,

    /// Tombstone flag: true once the line has been soft-deleted.
    pub removed: bool,

    /// When the line was soft-deleted.
    pub removed_at: Option<DateTime<Utc>>,

    /// When this line was added.
    pub added_at: DateTime<Utc>,
}

impl LineItem {
    /// Gross subtotal: quantity × unit price, or weight × rate.
    #[inline]
    pub fn gross(&self) -> Money {
        self.pricing.gross()
    }

    /// Line total after the line discount.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.gross() - self.discount
    }
}

// =============================================================================
// Session Totals
// =============================================================================

/// The derived calculation snapshot for a session.
///
/// `final_total = subtotal - total_discount + total_tax` holds by
/// construction after every `recalculate`; each component is whole cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Sum of gross line subtotals of surviving lines.
    pub subtotal: Money,
    /// Sum of line discounts of surviving lines.
    pub total_discount: Money,
    /// Sum of per-line tax on the discounted line totals.
    pub total_tax: Money,
    /// subtotal − total_discount + total_tax.
    pub final_total: Money,
}

// =============================================================================
// Session
// =============================================================================

/// A sale-in-progress: one independently editable tab held by a user on a
/// device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tab name, unique per (user, device) among open sessions.
    pub tab_name: String,

    /// Shop this tab sells for (tax configuration scope).
    pub shop_id: String,

    /// Cashier holding the tab.
    pub user_id: String,

    /// POS terminal the tab lives on.
    pub device_id: String,

    /// Optional customer reference.
    pub customer_id: Option<String>,

    /// Payment method chosen so far (fixed at completion).
    pub payment_method: Option<PaymentMethod>,

    /// Lifecycle state.
    pub state: SessionState,

    /// The permanent Sale once completed.
    pub sale_id: Option<String>,

    /// The grid: live and tombstoned lines.
    pub items: Vec<LineItem>,

    /// Derived calculation snapshot.
    pub totals: SessionTotals,

    /// Active flag (cleared when the session terminates).
    pub is_active: bool,

    /// When the tab was opened.
    pub created_at: DateTime<Utc>,

    /// Last activity; drives the expiry sweep.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Opens a new tab in `Active` state with an empty grid and zeroed
    /// totals.
    pub fn new(
        id: impl Into<String>,
        tab_name: impl Into<String>,
        shop_id: impl Into<String>,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        customer_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Session {
            id: id.into(),
            tab_name: tab_name.into(),
            shop_id: shop_id.into(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            customer_id,
            payment_method: None,
            state: SessionState::Active,
            sale_id: None,
            items: Vec::new(),
            totals: SessionTotals::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Surviving (non-tombstoned) lines.
    pub fn surviving_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|i| !i.removed)
    }

    /// Whether at least one surviving line exists (required to complete).
    pub fn has_surviving_items(&self) -> bool {
        self.items.iter().any(|i| !i.removed)
    }

    /// Number of surviving lines.
    pub fn surviving_count(&self) -> usize {
        self.items.iter().filter(|i| !i.removed).count()
    }

    /// Finds a line by its id, tombstoned or not.
    pub fn item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    fn live_index_by_product(&self, product_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| !i.removed && i.product_id == product_id)
    }

    fn tombstone_index_by_product(&self, product_id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.removed && i.product_id == product_id)
    }

    fn live_index_by_id(&self, session_id: &str, item_id: &str) -> CoreResult<usize> {
        self.items
            .iter()
            .position(|i| !i.removed && i.id == item_id)
            .ok_or_else(|| CoreError::ItemNotFound {
                session_id: session_id.to_string(),
                item_id: item_id.to_string(),
            })
    }

    // -------------------------------------------------------------------------
    // Grid Mutations
    // -------------------------------------------------------------------------

    /// Adds a unit-priced product, merging into an existing live line.
    ///
    /// ## Behavior
    /// - Product already live in the grid: quantity is incremented
    /// - Product only present as a tombstone: the line is revived fresh
    /// - Otherwise: a new line is appended
    ///
    /// ## Returns
    /// The id of the affected line.
    pub fn add_unit_item(&mut self, product: &Product, quantity: i64) -> CoreResult<String> {
        ensure_mutable(&self.id, self.state)?;

        if product.is_weight_based {
            return Err(CoreError::WeightBasedProduct {
                sku: product.sku.clone(),
            });
        }

        validate_quantity(quantity)?;
        validate_price_cents(product.price_cents)?;

        if let Some(idx) = self.live_index_by_product(&product.id) {
            let item = &mut self.items[idx];
            match item.pricing {
                Pricing::Unit {
                    quantity: existing, ..
                } => {
                    let merged = existing + quantity;
                    if merged > MAX_ITEM_QUANTITY {
                        return Err(CoreError::QuantityTooLarge {
                            requested: merged,
                            max: MAX_ITEM_QUANTITY,
                        });
                    }
                    item.pricing = Pricing::Unit {
                        quantity: merged,
                        unit_price: product.price(),
                    };
                }
                Pricing::Weight { .. } => {
                    // Catalog flipped pricing mode while the line was live
                    return Err(CoreError::WeightBasedProduct {
                        sku: product.sku.clone(),
                    });
                }
            }
            return Ok(self.items[idx].id.clone());
        }

        let pricing = Pricing::Unit {
            quantity,
            unit_price: product.price(),
        };
        self.insert_line(product, pricing)
    }

    /// Adds a weight-priced product, replacing the weight on an existing
    /// live line.
    ///
    /// The raw weight is rounded to the product's configured precision
    /// before pricing; a re-weigh replaces the previous reading (and resets
    /// the line discount, since it priced the old weight).
    ///
    /// ## Returns
    /// The id of the affected line.
    pub fn add_weight_item(&mut self, product: &Product, weight: Decimal) -> CoreResult<String> {
        ensure_mutable(&self.id, self.state)?;

        if !product.is_weight_based {
            return Err(CoreError::UnitPricedProduct {
                sku: product.sku.clone(),
            });
        }

        let rate = product.rate_per_kg().ok_or_else(|| CoreError::MissingRate {
            sku: product.sku.clone(),
        })?;
        validate_price_cents(rate.cents())?;

        validate_weight(weight)?;
        let rounded = round_weight(weight, product.weight_precision);
        // Rounding can collapse a tiny reading to zero
        validate_weight(rounded)?;

        if let Some(idx) = self.live_index_by_product(&product.id) {
            let item = &mut self.items[idx];
            item.pricing = Pricing::Weight {
                weight: rounded,
                rate_per_kg: rate,
            };
            item.discount = Money::zero();
            return Ok(item.id.clone());
        }

        let pricing = Pricing::Weight {
            weight: rounded,
            rate_per_kg: rate,
        };
        self.insert_line(product, pricing)
    }

    /// Revives a tombstoned line for the product, or appends a new line.
    fn insert_line(&mut self, product: &Product, pricing: Pricing) -> CoreResult<String> {
        if let Some(idx) = self.tombstone_index_by_product(&product.id) {
            let item = &mut self.items[idx];
            item.pricing = pricing;
            item.discount = Money::zero();
            item.removed = false;
            item.removed_at = None;
            item.added_at = Utc::now();
            return Ok(item.id.clone());
        }

        if self.surviving_count() >= MAX_SESSION_ITEMS {
            return Err(CoreError::GridTooLarge {
                max: MAX_SESSION_ITEMS,
            });
        }

        let item = LineItem {
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            pricing,
            discount: Money::zero(),
            removed: false,
            removed_at: None,
            added_at: Utc::now(),
        };
        let id = item.id.clone();
        self.items.push(item);
        Ok(id)
    }

    /// Updates the quantity of a unit-priced line.
    ///
    /// ## Behavior
    /// - `quantity == 0`: dispatches to `remove_item` (a zero-quantity line
    ///   and a removed line must be indistinguishable)
    /// - `quantity < 0`: validation error
    /// - Weight-priced line: wrong entry point
    pub fn update_quantity(&mut self, item_id: &str, quantity: i64) -> CoreResult<()> {
        ensure_mutable(&self.id, self.state)?;

        if quantity == 0 {
            return self.remove_item(item_id);
        }

        let session_id = self.id.clone();
        let idx = self.live_index_by_id(&session_id, item_id)?;

        match self.items[idx].pricing {
            Pricing::Unit { unit_price, .. } => {
                validate_quantity(quantity)?;
                self.items[idx].pricing = Pricing::Unit {
                    quantity,
                    unit_price,
                };
                Ok(())
            }
            Pricing::Weight { .. } => Err(CoreError::WeightBasedProduct {
                sku: self.items[idx].sku.clone(),
            }),
        }
    }

    /// Updates the weight of a weight-priced line.
    ///
    /// The caller is expected to have rounded `weight` to the product's
    /// configured precision. Zero dispatches to removal, mirroring
    /// `update_quantity`; a unit-priced line is rejected for every input,
    /// zero included.
    pub fn update_weight(&mut self, item_id: &str, weight: Decimal) -> CoreResult<()> {
        ensure_mutable(&self.id, self.state)?;

        let session_id = self.id.clone();
        let idx = self.live_index_by_id(&session_id, item_id)?;

        match self.items[idx].pricing {
            Pricing::Weight { rate_per_kg, .. } => {
                if weight == Decimal::ZERO {
                    return self.remove_item(item_id);
                }
                validate_weight(weight)?;
                let new_pricing = Pricing::Weight {
                    weight,
                    rate_per_kg,
                };
                // A shrunken weight must not leave the discount above the line
                let gross = new_pricing.gross();
                validate_discount(self.items[idx].discount, gross)?;
                self.items[idx].pricing = new_pricing;
                Ok(())
            }
            Pricing::Unit { .. } => Err(CoreError::UnitPricedProduct {
                sku: self.items[idx].sku.clone(),
            }),
        }
    }

    /// Sets the line discount.
    ///
    /// Rejected if negative or greater than the line's pre-discount
    /// subtotal.
    pub fn update_discount(&mut self, item_id: &str, discount: Money) -> CoreResult<()> {
        ensure_mutable(&self.id, self.state)?;

        let session_id = self.id.clone();
        let idx = self.live_index_by_id(&session_id, item_id)?;

        validate_discount(discount, self.items[idx].gross())?;
        self.items[idx].discount = discount;
        Ok(())
    }

    /// Soft-deletes a line: tombstone flag plus timestamp.
    ///
    /// The line stays in the grid for audit but is excluded from all
    /// subsequent recalculation.
    pub fn remove_item(&mut self, item_id: &str) -> CoreResult<()> {
        ensure_mutable(&self.id, self.state)?;

        let session_id = self.id.clone();
        let idx = self.live_index_by_id(&session_id, item_id)?;

        self.items[idx].removed = true;
        self.items[idx].removed_at = Some(Utc::now());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Recalculation
    // -------------------------------------------------------------------------

    /// Recomputes the calculation snapshot from the surviving lines.
    ///
    /// The only writer of `totals`. Per-line tax is charged on the
    /// discounted line total at the shop's rate, rounded half away from
    /// zero; every component is whole cents, so running this twice in a
    /// row is a no-op.
    pub fn recalculate(&mut self, rate: TaxRate) -> SessionTotals {
        let mut subtotal = Money::zero();
        let mut total_discount = Money::zero();
        let mut total_tax = Money::zero();

        for item in self.items.iter().filter(|i| !i.removed) {
            subtotal += item.gross();
            total_discount += item.discount;
            total_tax += item.line_total().calculate_tax(rate);
        }

        self.totals = SessionTotals {
            subtotal,
            total_discount,
            total_tax,
            final_total: subtotal - total_discount + total_tax,
        };
        self.totals
    }

    /// Bumps the activity timestamp (expiry signal, not a content change).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
