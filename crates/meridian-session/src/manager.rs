//! # Session Manager
//!
//! The orchestration layer for concurrent sale tabs.
//!
//! ## The One Writer Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Every Mutating Operation                             │
//! │                                                                         │
//! │  1. acquire the session's keyed lock                                   │
//! │  2. load the stored session                                            │
//! │  3. ensure it is still mutable (Active / Suspended)                    │
//! │  4. apply the grid mutation (meridian-core)                            │
//! │  5. recalculate totals at the shop's tax rate                          │
//! │  6. persist columns + re-serialized snapshot together (meridian-db)    │
//! │  7. return the updated session                                         │
//! │                                                                         │
//! │  The guarded UPDATE in step 6 matches only open rows: a session that   │
//! │  reached a terminal state while this mutation was in flight is left    │
//! │  untouched and the caller gets StaleSession.                           │
//! │                                                                         │
//! │  create_session runs under the (user, device) owner lock instead:      │
//! │  duplicate-tab and quota checks serialize there, with the partial      │
//! │  unique tab index as the transactional backstop.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collaborator calls (catalog, stock, tax, weight validation) happen while
//! holding at most this session's lock, never another's; stock and catalog
//! reads used only for advisory checks fail open.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use meridian_core::lifecycle::{validate_transition, SessionState};
use meridian_core::money::Money;
use meridian_core::session::{LineItem, Pricing, Session};
use meridian_core::types::{PaymentMethod, Product, Sale, SaleItem, SaleStatus, TaxRate};
use meridian_core::validation::validate_tab_name;
use meridian_core::ValidationError;
use meridian_db::repository::sale::generate_invoice_ref;
use meridian_db::{Database, DbError};

use crate::adapters::{FixedTaxConfig, ScaleRules, SqliteCatalog, SqliteSales, SqliteStock};
use crate::config::EngineConfig;
use crate::error::{SessionError, SessionResult};
use crate::locks::KeyedLocks;
use crate::traits::{ProductCatalog, SalePersistence, StockLevel, TaxConfiguration, WeightPricing};

// =============================================================================
// Request / Report Types
// =============================================================================

/// One entry of a full grid overwrite.
///
/// The same sum-type shape as the line pricing: an entry is unit- or
/// weight-priced, never both. The engine rebuilds the grid from catalog
/// lookups; an externally supplied snapshot is never trusted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GridEntry {
    Unit {
        product_id: String,
        quantity: i64,
        #[serde(default)]
        discount_cents: i64,
    },
    Weight {
        product_id: String,
        weight: Decimal,
        #[serde(default)]
        discount_cents: i64,
    },
}

/// Partial update of a session's mutable fields.
///
/// Absent fields are left unchanged. A present `grid` replaces the whole
/// item list (rebuilt from catalog lookups) before recalculation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    pub session_id: String,
    pub tab_name: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub customer_id: Option<String>,
    pub grid: Option<Vec<GridEntry>>,
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Advisory; does not block the session (e.g. stock source unreachable).
    Warning,
    /// Structural problem; the session should not complete as-is.
    Error,
}

/// One finding from a structural re-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// The line the finding concerns, if any.
    pub item_id: Option<String>,
    pub message: String,
}

/// The result of `validate`: a non-mutating structural re-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub session_id: String,
    /// True when no Error-severity issue was found. Warnings (fail-open
    /// stock checks) do not clear this flag.
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn new(session_id: &str, issues: Vec<ValidationIssue>) -> Self {
        let is_valid = !issues.iter().any(|i| i.severity == IssueSeverity::Error);
        ValidationReport {
            session_id: session_id.to_string(),
            is_valid,
            issues,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a `SessionManager` with non-default collaborators.
///
/// Any collaborator left unset falls back to the local SQLite adapter
/// (catalog, stock, sales), the engine's fallback tax rate, or the pure
/// scale rules.
pub struct SessionManagerBuilder {
    db: Database,
    config: EngineConfig,
    catalog: Option<Arc<dyn ProductCatalog>>,
    stock: Option<Arc<dyn StockLevel>>,
    tax: Option<Arc<dyn TaxConfiguration>>,
    weights: Option<Arc<dyn WeightPricing>>,
    sales: Option<Arc<dyn SalePersistence>>,
}

impl SessionManagerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn stock(mut self, stock: Arc<dyn StockLevel>) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn tax(mut self, tax: Arc<dyn TaxConfiguration>) -> Self {
        self.tax = Some(tax);
        self
    }

    pub fn weights(mut self, weights: Arc<dyn WeightPricing>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn sales(mut self, sales: Arc<dyn SalePersistence>) -> Self {
        self.sales = Some(sales);
        self
    }

    pub fn build(self) -> SessionManager {
        let db = self.db;
        SessionManager {
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(SqliteCatalog::new(db.clone()))),
            stock: self
                .stock
                .unwrap_or_else(|| Arc::new(SqliteStock::new(db.clone()))),
            tax: self
                .tax
                .unwrap_or_else(|| Arc::new(FixedTaxConfig::unconfigured())),
            weights: self.weights.unwrap_or_else(|| Arc::new(ScaleRules)),
            sales: self
                .sales
                .unwrap_or_else(|| Arc::new(SqliteSales::new(db.clone()))),
            session_locks: KeyedLocks::new(),
            owner_locks: KeyedLocks::new(),
            config: self.config,
            db,
        }
    }
}

// =============================================================================
// Session Manager
// =============================================================================

/// The multi-session sale engine.
///
/// One instance owns the session store for the process; sessions are the
/// unit of parallelism, and the manager is cheap to share behind an `Arc`.
pub struct SessionManager {
    db: Database,
    config: EngineConfig,
    catalog: Arc<dyn ProductCatalog>,
    stock: Arc<dyn StockLevel>,
    tax: Arc<dyn TaxConfiguration>,
    weights: Arc<dyn WeightPricing>,
    sales: Arc<dyn SalePersistence>,
    session_locks: KeyedLocks<String>,
    owner_locks: KeyedLocks<(String, String)>,
}

impl SessionManager {
    /// Creates a manager with the default SQLite-backed collaborators.
    pub fn new(db: Database) -> Self {
        Self::builder(db).build()
    }

    /// Starts a builder for overriding configuration or collaborators.
    pub fn builder(db: Database) -> SessionManagerBuilder {
        SessionManagerBuilder {
            db,
            config: EngineConfig::default(),
            catalog: None,
            stock: None,
            tax: None,
            weights: None,
            sales: None,
        }
    }

    // -------------------------------------------------------------------------
    // Creation & Quota
    // -------------------------------------------------------------------------

    /// Opens a new sale tab.
    ///
    /// ## Rejections
    /// - Empty tab name: `Validation`
    /// - An open session with this name already exists for the
    ///   (user, device): `DuplicateTabName`
    /// - The (user, device) already holds the configured cap of open
    ///   sessions: `ConcurrencyLimitExceeded`
    ///
    /// Both checks run under the owner lock, so concurrent creations from
    /// the same device cannot slip past the cap between check and insert.
    pub async fn create_session(
        &self,
        tab_name: &str,
        shop_id: &str,
        user_id: &str,
        device_id: &str,
        customer_id: Option<String>,
    ) -> SessionResult<Session> {
        let tab_name = validate_tab_name(tab_name)?;
        debug!(tab = %tab_name, user = %user_id, device = %device_id, "create_session");

        let _owner = self
            .owner_locks
            .acquire((user_id.to_string(), device_id.to_string()))
            .await;

        let repo = self.db.sessions();

        if repo.open_tab_exists(user_id, device_id, &tab_name).await? {
            return Err(SessionError::DuplicateTabName { tab_name });
        }

        let open = repo.count_open(user_id, device_id).await?;
        if open as usize >= self.config.max_open_sessions {
            return Err(SessionError::ConcurrencyLimitExceeded {
                max: self.config.max_open_sessions,
            });
        }

        let session = Session::new(
            Uuid::new_v4().to_string(),
            tab_name.clone(),
            shop_id,
            user_id,
            device_id,
            customer_id,
        );

        match repo.insert(&session).await {
            Ok(()) => {
                info!(id = %session.id, tab = %session.tab_name, "Session created");
                Ok(session)
            }
            // The partial unique index caught a racing create that the
            // owner lock did not cover (e.g. a second engine instance)
            Err(DbError::UniqueViolation { .. }) => {
                Err(SessionError::DuplicateTabName { tab_name })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the (user, device) may open another tab right now.
    pub async fn can_create_session(&self, user_id: &str, device_id: &str) -> SessionResult<bool> {
        let open = self.db.sessions().count_open(user_id, device_id).await?;
        Ok((open as usize) < self.config.max_open_sessions)
    }

    /// The configured per-(user, device) open session cap.
    pub fn max_open_sessions(&self) -> usize {
        self.config.max_open_sessions
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Fetches a session by id, in any state.
    pub async fn session(&self, session_id: &str) -> SessionResult<Session> {
        self.load(session_id).await
    }

    /// The open (Active/Suspended) sessions for one (user, device).
    pub async fn active_sessions(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> SessionResult<Vec<Session>> {
        Ok(self.db.sessions().list_open(user_id, device_id).await?)
    }

    // -------------------------------------------------------------------------
    // Activity
    // -------------------------------------------------------------------------

    /// Marks a session as the one being worked on.
    ///
    /// Only bumps the activity timestamp the expiry sweep reads; content
    /// is untouched.
    pub async fn switch_to(&self, session_id: &str) -> SessionResult<Session> {
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        session.touch();

        match self.db.sessions().touch(session_id, session.updated_at).await {
            Ok(()) => Ok(session),
            Err(DbError::NotFound { .. }) => Err(self.stale(session_id).await),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Grid Mutations
    // -------------------------------------------------------------------------

    /// Adds a unit-priced product to a session's grid.
    ///
    /// Adding a product already live in the grid merges by incrementing
    /// its quantity rather than duplicating the line. Weight-based
    /// products are rejected toward the weight entry point.
    pub async fn add_unit_item(
        &self,
        session_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, product = %product_id, quantity, "add_unit_item");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        let product = self.require_product(product_id).await?;

        // The stock check covers the line's prospective quantity after the
        // merge, not just the increment
        let existing = session
            .surviving_items()
            .find(|i| i.product_id == product.id)
            .and_then(|i| match i.pricing {
                Pricing::Unit { quantity, .. } => Some(quantity),
                Pricing::Weight { .. } => None,
            })
            .unwrap_or(0);
        self.check_stock(&product, existing + quantity).await?;

        session.add_unit_item(&product, quantity)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Adds a weight-priced product to a session's grid.
    ///
    /// The raw scale reading must pass the weight-validation collaborator;
    /// it is then rounded to the product's configured precision before
    /// pricing. Re-adding a product already in the grid replaces the
    /// weight (a re-weigh), it does not accumulate.
    pub async fn add_weight_item(
        &self,
        session_id: &str,
        product_id: &str,
        weight: Decimal,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, product = %product_id, %weight, "add_weight_item");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        let product = self.require_product(product_id).await?;

        let weight = if product.is_weight_based {
            self.checked_weight(&product, weight).await?
        } else {
            // Let the grid raise the wrong-entry-point error
            weight
        };

        session.add_weight_item(&product, weight)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Sets the quantity of a unit-priced line. Zero removes the line;
    /// negative quantities are rejected.
    pub async fn update_quantity(
        &self,
        session_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, item = %item_id, quantity, "update_quantity");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;

        if quantity > 0 {
            if let Some(line) = session.item(item_id) {
                // Advisory stock check against the new absolute quantity;
                // a vanished or unreachable catalog does not block
                match self.catalog.product_by_id(&line.product_id).await {
                    Ok(Some(product)) => self.check_stock(&product, quantity).await?,
                    Ok(None) => {}
                    Err(err) => warn!(
                        item = %item_id,
                        error = %err,
                        "Catalog unreachable during quantity update; skipping stock check"
                    ),
                }
            }
        }

        session.update_quantity(item_id, quantity)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Sets the weight of a weight-priced line. Zero removes the line,
    /// mirroring `update_quantity`; unit-priced lines are rejected for
    /// every reading, zero included.
    pub async fn update_weight(
        &self,
        session_id: &str,
        item_id: &str,
        weight: Decimal,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, item = %item_id, %weight, "update_weight");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;

        let weight = if weight == Decimal::ZERO {
            weight
        } else if let Some(line) = session.item(item_id) {
            match self.catalog.product_by_id(&line.product_id).await {
                Ok(Some(product)) if product.is_weight_based => {
                    self.checked_weight(&product, weight).await?
                }
                // The line keeps its frozen pricing; the grid still
                // bounds-checks the raw reading
                _ => weight,
            }
        } else {
            weight
        };

        session.update_weight(item_id, weight)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Sets a line discount. Rejected when negative or above the line's
    /// pre-discount subtotal.
    pub async fn update_discount(
        &self,
        session_id: &str,
        item_id: &str,
        discount: Money,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, item = %item_id, %discount, "update_discount");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        session.update_discount(item_id, discount)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Soft-deletes a line: it stays in the grid as a tombstone for audit
    /// but leaves every total.
    pub async fn remove_item(&self, session_id: &str, item_id: &str) -> SessionResult<Session> {
        debug!(session = %session_id, item = %item_id, "remove_item");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        session.remove_item(item_id)?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Recomputes and persists the calculation snapshot without changing
    /// the grid. Idempotent: a second run is a no-op.
    pub async fn recalculate_totals(&self, session_id: &str) -> SessionResult<Session> {
        debug!(session = %session_id, "recalculate_totals");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Replaces the whole grid with the given entries.
    ///
    /// The new grid is rebuilt from catalog lookups; the caller supplies
    /// product references and quantities, never totals.
    pub async fn save_state(
        &self,
        session_id: &str,
        entries: &[GridEntry],
    ) -> SessionResult<Session> {
        debug!(session = %session_id, entries = entries.len(), "save_state");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        self.rebuild_grid(&mut session, entries).await?;
        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    /// Applies a partial update of the session's mutable fields, then
    /// recalculates and persists.
    pub async fn update_session(&self, request: UpdateSessionRequest) -> SessionResult<Session> {
        debug!(session = %request.session_id, "update_session");
        let _guard = self
            .session_locks
            .acquire(request.session_id.clone())
            .await;

        let mut session = self.load_open(&request.session_id).await?;

        if let Some(name) = &request.tab_name {
            // A rename into a name already open on this device trips the
            // partial unique index at persist time
            session.tab_name = validate_tab_name(name)?;
        }
        if let Some(payment) = request.payment_method {
            session.payment_method = Some(payment);
        }
        if let Some(customer) = request.customer_id {
            session.customer_id = Some(customer);
        }
        if let Some(entries) = &request.grid {
            self.rebuild_grid(&mut session, entries).await?;
        }

        self.finish_mutation(&mut session).await?;
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Commits the session into a permanent Sale and moves it to the
    /// terminal `Completed` state.
    ///
    /// ## Flow
    /// 1. Requires at least one surviving line item
    /// 2. Recalculates totals at the shop's tax rate
    /// 3. Creates the Sale, attaches the surviving lines, finalizes it
    ///    with the payment method
    /// 4. Transitions the session to `Completed` and persists
    ///
    /// After this returns, every further mutation of the session fails
    /// with `StaleSession`.
    pub async fn complete(
        &self,
        session_id: &str,
        payment_method: PaymentMethod,
    ) -> SessionResult<Session> {
        debug!(session = %session_id, ?payment_method, "complete");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;

        if !session.has_surviving_items() {
            return Err(SessionError::EmptySession {
                session_id: session_id.to_string(),
            });
        }

        let rate = self.tax_rate(&session.shop_id).await?;
        session.recalculate(rate);

        let now = Utc::now();
        let sale = Sale {
            id: Uuid::new_v4().to_string(),
            invoice_ref: generate_invoice_ref(&session.device_id),
            status: SaleStatus::Pending,
            shop_id: session.shop_id.clone(),
            subtotal_cents: session.totals.subtotal.cents(),
            discount_cents: session.totals.total_discount.cents(),
            tax_cents: session.totals.total_tax.cents(),
            total_cents: session.totals.final_total.cents(),
            payment_method: None,
            user_id: session.user_id.clone(),
            device_id: session.device_id.clone(),
            created_at: now,
            completed_at: None,
        };

        let sale_id = self.sales.create_sale(&sale).await?;
        for line in session.surviving_items() {
            self.sales
                .add_item(&sale_item_from_line(&sale_id, line, rate))
                .await?;
        }
        let finalized = self.sales.complete_sale(&sale_id, payment_method).await?;

        validate_transition(&session.id, session.state, SessionState::Completed)?;
        session.state = SessionState::Completed;
        session.sale_id = Some(finalized.id);
        session.payment_method = Some(payment_method);
        session.is_active = false;
        session.touch();

        self.persist(&session).await?;
        info!(
            id = %session.id,
            sale = session.sale_id.as_deref().unwrap_or(""),
            total = %session.totals.final_total,
            "Session completed"
        );
        Ok(session)
    }

    /// Parks a session. Suspended tabs stay editable and still count
    /// against the quota. Suspending a suspended session is a no-op.
    pub async fn suspend(&self, session_id: &str) -> SessionResult<Session> {
        debug!(session = %session_id, "suspend");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        if session.state == SessionState::Suspended {
            return Ok(session);
        }

        validate_transition(&session.id, session.state, SessionState::Suspended)?;
        session.state = SessionState::Suspended;
        session.touch();
        self.persist(&session).await?;
        Ok(session)
    }

    /// Brings a suspended session back to `Active`. Resuming an active
    /// session is a no-op.
    pub async fn resume(&self, session_id: &str) -> SessionResult<Session> {
        debug!(session = %session_id, "resume");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;
        if session.state == SessionState::Active {
            return Ok(session);
        }

        validate_transition(&session.id, session.state, SessionState::Active)?;
        session.state = SessionState::Active;
        session.touch();
        self.persist(&session).await?;
        Ok(session)
    }

    /// Closes a session without completing it: terminal `Cancelled`.
    ///
    /// With `save_state` the grid is kept in the stored snapshot for
    /// audit; without it the grid is discarded and the totals zeroed.
    pub async fn close(&self, session_id: &str, save_state: bool) -> SessionResult<Session> {
        debug!(session = %session_id, save_state, "close");
        let _guard = self.session_locks.acquire(session_id.to_string()).await;

        let mut session = self.load_open(session_id).await?;

        if !save_state {
            session.items.clear();
            session.recalculate(TaxRate::zero());
        }

        validate_transition(&session.id, session.state, SessionState::Cancelled)?;
        session.state = SessionState::Cancelled;
        session.is_active = false;
        session.touch();
        self.persist(&session).await?;
        info!(id = %session.id, "Session cancelled");
        Ok(session)
    }

    /// Bulk-expires every open session idle since before `threshold`.
    /// Returns the number transitioned; a second immediate run returns 0.
    pub async fn cleanup_expired(&self, threshold: DateTime<Utc>) -> SessionResult<u64> {
        let expired = self.db.sessions().expire_stale(threshold).await?;
        if expired > 0 {
            info!(count = expired, %threshold, "Expired stale sessions");
        }
        Ok(expired)
    }

    /// The periodic sweep: expires sessions idle longer than the
    /// configured `idle_timeout`.
    pub async fn cleanup_idle(&self) -> SessionResult<u64> {
        let threshold = Utc::now() - Duration::seconds(self.config.idle_timeout.as_secs() as i64);
        self.cleanup_expired(threshold).await
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Structural re-check of a session without mutating it.
    ///
    /// Per line: quantity/weight positivity, non-negative price, discount
    /// bounds. Per session: state/flag consistency and the totals
    /// identity. Stock sufficiency is checked softly: an unreachable
    /// stock source degrades to a warning.
    pub async fn validate(&self, session_id: &str) -> SessionResult<ValidationReport> {
        debug!(session = %session_id, "validate");
        let session = self.load(session_id).await?;
        let mut issues = Vec::new();

        if session.is_active == session.state.is_terminal() {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                item_id: None,
                message: format!(
                    "active flag {} disagrees with state {}",
                    session.is_active, session.state
                ),
            });
        }

        let totals = session.totals;
        if totals.final_total != totals.subtotal - totals.total_discount + totals.total_tax {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                item_id: None,
                message: "totals identity violated: final != subtotal - discount + tax".to_string(),
            });
        }

        for line in session.surviving_items() {
            self.validate_line(line, &mut issues).await;
        }

        Ok(ValidationReport::new(session_id, issues))
    }

    async fn validate_line(&self, line: &LineItem, issues: &mut Vec<ValidationIssue>) {
        let item_id = Some(line.id.clone());

        match &line.pricing {
            Pricing::Unit {
                quantity,
                unit_price,
            } => {
                if *quantity <= 0 {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        item_id: item_id.clone(),
                        message: format!("{}: quantity must be positive", line.sku),
                    });
                }
                if unit_price.is_negative() {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        item_id: item_id.clone(),
                        message: format!("{}: negative unit price", line.sku),
                    });
                }

                match self.catalog.product_by_id(&line.product_id).await {
                    Ok(Some(product)) => {
                        if product.is_weight_based {
                            issues.push(ValidationIssue {
                                severity: IssueSeverity::Error,
                                item_id: item_id.clone(),
                                message: format!(
                                    "{}: product is weight-based but the line is unit-priced",
                                    line.sku
                                ),
                            });
                        }
                        self.soft_stock_issue(&product, *quantity, &item_id, issues)
                            .await;
                    }
                    Ok(None) => issues.push(ValidationIssue {
                        severity: IssueSeverity::Warning,
                        item_id: item_id.clone(),
                        message: format!("{}: product no longer in catalog", line.sku),
                    }),
                    Err(err) => issues.push(ValidationIssue {
                        severity: IssueSeverity::Warning,
                        item_id: item_id.clone(),
                        message: format!("{}: catalog unreachable ({err})", line.sku),
                    }),
                }
            }
            Pricing::Weight {
                weight,
                rate_per_kg,
            } => {
                if *weight <= Decimal::ZERO {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        item_id: item_id.clone(),
                        message: format!("{}: weight must be positive", line.sku),
                    });
                }
                if rate_per_kg.is_negative() {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        item_id: item_id.clone(),
                        message: format!("{}: negative rate per kilogram", line.sku),
                    });
                }
            }
        }

        if line.discount.is_negative() || line.discount > line.gross() {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                item_id,
                message: format!("{}: discount outside the line subtotal", line.sku),
            });
        }
    }

    async fn soft_stock_issue(
        &self,
        product: &Product,
        requested: i64,
        item_id: &Option<String>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if !product.track_inventory {
            return;
        }
        match self.stock.on_hand(&product.id).await {
            Ok(Some(available)) if available < requested && !product.allow_negative_stock => {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Error,
                    item_id: item_id.clone(),
                    message: format!(
                        "{}: insufficient stock (available {available}, requested {requested})",
                        product.sku
                    ),
                });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(sku = %product.sku, error = %err, "Stock source unreachable during validation");
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    item_id: item_id.clone(),
                    message: format!("{}: stock source unreachable, not verified", product.sku),
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load(&self, session_id: &str) -> SessionResult<Session> {
        self.db
            .sessions()
            .fetch(session_id)
            .await?
            .ok_or_else(|| SessionError::not_found("Session", session_id))
    }

    async fn load_open(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.load(session_id).await?;
        if session.state.is_terminal() {
            return Err(SessionError::StaleSession {
                session_id: session_id.to_string(),
                state: session.state.to_string(),
            });
        }
        Ok(session)
    }

    /// The tail of every mutation: recalculate at the shop's rate, bump
    /// activity, persist columns and snapshot together.
    async fn finish_mutation(&self, session: &mut Session) -> SessionResult<()> {
        let rate = self.tax_rate(&session.shop_id).await?;
        session.recalculate(rate);
        session.touch();
        self.persist(session).await
    }

    async fn persist(&self, session: &Session) -> SessionResult<()> {
        match self.db.sessions().update(session).await {
            Ok(()) => Ok(()),
            // The guarded UPDATE matched nothing: the stored row left the
            // open states while this mutation was in flight
            Err(DbError::NotFound { .. }) => Err(self.stale(&session.id).await),
            Err(DbError::UniqueViolation { .. }) => Err(SessionError::DuplicateTabName {
                tab_name: session.tab_name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Builds the StaleSession error for a session whose guarded write
    /// lost a race, reporting the terminal state it actually reached.
    async fn stale(&self, session_id: &str) -> SessionError {
        match self.db.sessions().fetch(session_id).await {
            Ok(Some(stored)) => SessionError::StaleSession {
                session_id: session_id.to_string(),
                state: stored.state.to_string(),
            },
            _ => SessionError::not_found("Session", session_id),
        }
    }

    async fn tax_rate(&self, shop_id: &str) -> SessionResult<TaxRate> {
        Ok(self
            .tax
            .default_rate(shop_id)
            .await?
            .unwrap_or(self.config.fallback_tax_rate))
    }

    async fn require_product(&self, product_id: &str) -> SessionResult<Product> {
        let product = self
            .catalog
            .product_by_id(product_id)
            .await?
            .ok_or_else(|| SessionError::not_found("Product", product_id))?;
        if !product.is_active {
            return Err(SessionError::not_found("Product", product_id));
        }
        Ok(product)
    }

    /// Fail-open stock gate for adds and quantity updates.
    async fn check_stock(&self, product: &Product, requested: i64) -> SessionResult<()> {
        if !product.track_inventory {
            return Ok(());
        }
        match self.stock.on_hand(&product.id).await {
            Ok(Some(available)) if available < requested && !product.allow_negative_stock => {
                Err(SessionError::InsufficientStock {
                    sku: product.sku.clone(),
                    available,
                    requested,
                })
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(sku = %product.sku, error = %err, "Stock source unreachable; allowing sale");
                Ok(())
            }
        }
    }

    /// Validates a raw scale reading with the collaborator, then rounds it
    /// to the product's configured precision.
    async fn checked_weight(&self, product: &Product, weight: Decimal) -> SessionResult<Decimal> {
        if !self.weights.validate_weight(weight, product).await? {
            return Err(ValidationError::InvalidFormat {
                field: "weight".to_string(),
                reason: "rejected by weight validation".to_string(),
            }
            .into());
        }
        Ok(self.weights.round_weight(weight, product.weight_precision))
    }

    /// Rebuilds a session's grid from scratch out of catalog lookups.
    async fn rebuild_grid(
        &self,
        session: &mut Session,
        entries: &[GridEntry],
    ) -> SessionResult<()> {
        session.items.clear();

        for entry in entries {
            match entry {
                GridEntry::Unit {
                    product_id,
                    quantity,
                    discount_cents,
                } => {
                    let product = self.require_product(product_id).await?;
                    self.check_stock(&product, *quantity).await?;
                    let line_id = session.add_unit_item(&product, *quantity)?;
                    if *discount_cents != 0 {
                        session.update_discount(&line_id, Money::from_cents(*discount_cents))?;
                    }
                }
                GridEntry::Weight {
                    product_id,
                    weight,
                    discount_cents,
                } => {
                    let product = self.require_product(product_id).await?;
                    let weight = if product.is_weight_based {
                        self.checked_weight(&product, *weight).await?
                    } else {
                        *weight
                    };
                    let line_id = session.add_weight_item(&product, weight)?;
                    if *discount_cents != 0 {
                        session.update_discount(&line_id, Money::from_cents(*discount_cents))?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Freezes one surviving grid line onto the permanent sale record.
fn sale_item_from_line(sale_id: &str, line: &LineItem, rate: TaxRate) -> SaleItem {
    let (quantity, unit_price_cents) = match &line.pricing {
        Pricing::Unit {
            quantity,
            unit_price,
        } => (Decimal::from(*quantity), unit_price.cents()),
        Pricing::Weight {
            weight,
            rate_per_kg,
        } => (*weight, rate_per_kg.cents()),
    };

    SaleItem {
        id: Uuid::new_v4().to_string(),
        sale_id: sale_id.to_string(),
        product_id: line.product_id.clone(),
        sku_snapshot: line.sku.clone(),
        name_snapshot: line.name.clone(),
        quantity,
        unit_price_cents,
        line_total_cents: line.line_total().cents(),
        discount_cents: line.discount.cents(),
        tax_cents: line.line_total().calculate_tax(rate).cents(),
        created_at: Utc::now(),
    }
}
