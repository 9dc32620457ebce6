//! End-to-end engine suite: a real in-memory SQLite store behind the
//! manager, with a controllable stock double where a test needs to flip
//! the collaborator between reachable, empty, and failing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use meridian_core::lifecycle::SessionState;
use meridian_core::money::Money;
use meridian_core::types::{PaymentMethod, Product, SaleStatus, TaxRate};
use meridian_core::CoreError;
use meridian_db::{Database, DbConfig};
use meridian_session::{
    EngineConfig, GridEntry, IssueSeverity, SessionError, SessionManager, SessionResult,
    StockLevel, UpdateSessionRequest,
};

// =============================================================================
// Test Harness
// =============================================================================

/// Stock double: per-product levels, plus a switch that makes the whole
/// source unreachable.
#[derive(Default)]
struct TestStock {
    unreachable: AtomicBool,
    levels: Mutex<HashMap<String, i64>>,
}

impl TestStock {
    fn set_level(&self, product_id: &str, level: i64) {
        self.levels
            .lock()
            .unwrap()
            .insert(product_id.to_string(), level);
    }

    fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl StockLevel for TestStock {
    async fn on_hand(&self, product_id: &str) -> SessionResult<Option<i64>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SessionError::collaborator("stock", "connection refused"));
        }
        Ok(self.levels.lock().unwrap().get(product_id).copied())
    }
}

struct Harness {
    db: Database,
    engine: Arc<SessionManager>,
    stock: Arc<TestStock>,
}

async fn harness_with(config: EngineConfig) -> Harness {
    // RUST_LOG=debug surfaces the engine's tracing during a failing run
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let stock = Arc::new(TestStock::default());
    let engine = SessionManager::builder(db.clone())
        .config(config)
        .stock(stock.clone())
        .build();
    Harness {
        db,
        engine: Arc::new(engine),
        stock,
    }
}

/// Default harness: 10% tax, default cap of 5.
async fn harness() -> Harness {
    harness_with(EngineConfig::default().fallback_tax_rate(TaxRate::from_bps(1000))).await
}

fn unit_product(id: &str, price_cents: i64) -> Product {
    Product {
        id: id.to_string(),
        sku: format!("SKU-{}", id),
        barcode: None,
        name: format!("Product {}", id),
        description: None,
        price_cents,
        is_weight_based: false,
        rate_per_kg_cents: None,
        weight_precision: 3,
        track_inventory: false,
        allow_negative_stock: false,
        current_stock: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn weight_product(id: &str, rate_cents: i64) -> Product {
    Product {
        is_weight_based: true,
        rate_per_kg_cents: Some(rate_cents),
        ..unit_product(id, rate_cents)
    }
}

async fn seed(db: &Database, product: &Product) {
    db.products().insert(product).await.unwrap();
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

async fn open_tab(h: &Harness, tab: &str) -> String {
    h.engine
        .create_session(tab, "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap()
        .id
}

// =============================================================================
// Creation & Quota
// =============================================================================

#[tokio::test]
async fn test_create_session_starts_active_and_empty() {
    let h = harness().await;

    let session = h
        .engine
        .create_session("  Table 4 ", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap();

    assert_eq!(session.tab_name, "Table 4"); // trimmed
    assert_eq!(session.state, SessionState::Active);
    assert!(session.is_active);
    assert!(session.items.is_empty());
    assert_eq!(session.totals.final_total.cents(), 0);

    // Persisted and readable back
    let stored = h.engine.session(&session.id).await.unwrap();
    assert_eq!(stored.tab_name, "Table 4");
}

#[tokio::test]
async fn test_create_rejects_empty_tab_name() {
    let h = harness().await;

    let err = h
        .engine
        .create_session("   ", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[tokio::test]
async fn test_duplicate_tab_name_rejected_until_terminated() {
    let h = harness().await;
    let id = open_tab(&h, "Table 4").await;

    let err = h
        .engine
        .create_session("Table 4", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateTabName { .. }));

    // A cancelled tab frees its name
    h.engine.close(&id, true).await.unwrap();
    h.engine
        .create_session("Table 4", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sixth_session_hits_concurrency_cap() {
    let h = harness().await;

    for i in 0..5 {
        open_tab(&h, &format!("Tab {}", i)).await;
    }
    assert!(!h.engine.can_create_session("user-1", "dev-1").await.unwrap());

    let err = h
        .engine
        .create_session("Tab 5", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::ConcurrencyLimitExceeded { max: 5 }
    ));

    // A different device has its own quota
    h.engine
        .create_session("Tab 5", "shop-1", "user-1", "dev-2", None)
        .await
        .unwrap();
    assert_eq!(h.engine.max_open_sessions(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_creation_respects_cap() {
    let h = harness().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_session(&format!("Tab {}", i), "shop-1", "user-1", "dev-1", None)
                .await
        }));
    }

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(SessionError::ConcurrencyLimitExceeded { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // The owner lock serializes the check-then-insert: never over the cap
    assert_eq!(created, 5);
    assert_eq!(rejected, 3);
    assert_eq!(
        h.engine
            .active_sessions("user-1", "dev-1")
            .await
            .unwrap()
            .len(),
        5
    );
}

#[tokio::test]
async fn test_suspended_sessions_count_against_quota() {
    let h = harness_with(EngineConfig::default().max_open_sessions(2)).await;

    let id = open_tab(&h, "Tab 0").await;
    open_tab(&h, "Tab 1").await;
    h.engine.suspend(&id).await.unwrap();

    let err = h
        .engine
        .create_session("Tab 2", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ConcurrencyLimitExceeded { .. }));
}

// =============================================================================
// Grid Mutations & Totals
// =============================================================================

#[tokio::test]
async fn test_mixed_grid_scenario() {
    // Unit: qty 2 × $10.00 → $20.00; weight: 1.5 kg × $20.00/kg → $30.00
    // 10% tax → subtotal 50.00, discount 0, tax 5.00, total 55.00
    let h = harness().await;
    seed(&h.db, &unit_product("p-a", 1000)).await;
    seed(&h.db, &weight_product("p-b", 2000)).await;
    let id = open_tab(&h, "Tab 1").await;

    h.engine.add_unit_item(&id, "p-a", 2).await.unwrap();
    let session = h.engine.add_weight_item(&id, "p-b", dec("1.5")).await.unwrap();

    assert_eq!(session.totals.subtotal.cents(), 5000);
    assert_eq!(session.totals.total_discount.cents(), 0);
    assert_eq!(session.totals.total_tax.cents(), 500);
    assert_eq!(session.totals.final_total.cents(), 5500);

    // The stored snapshot carries the same numbers
    let stored = h.engine.session(&id).await.unwrap();
    assert_eq!(stored.totals, session.totals);
    assert_eq!(stored.items.len(), 2);
}

#[tokio::test]
async fn test_totals_identity_after_every_mutation() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-a", 333)).await;
    seed(&h.db, &weight_product("p-b", 999)).await;
    let id = open_tab(&h, "Tab 1").await;

    let s1 = h.engine.add_unit_item(&id, "p-a", 3).await.unwrap();
    let line_a = s1.items[0].id.clone();
    let s2 = h.engine.add_weight_item(&id, "p-b", dec("0.335")).await.unwrap();
    let s3 = h
        .engine
        .update_discount(&id, &line_a, Money::from_cents(50))
        .await
        .unwrap();
    let s4 = h.engine.update_quantity(&id, &line_a, 2).await.unwrap();

    for session in [s1, s2, s3, s4] {
        let t = session.totals;
        assert_eq!(
            t.final_total,
            t.subtotal - t.total_discount + t.total_tax,
            "identity violated at {:?}",
            t
        );
    }
}

#[tokio::test]
async fn test_adding_same_product_twice_merges() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;

    let merged = open_tab(&h, "Merged").await;
    h.engine.add_unit_item(&merged, "p-1", 2).await.unwrap();
    let merged_session = h.engine.add_unit_item(&merged, "p-1", 3).await.unwrap();

    let combined = open_tab(&h, "Combined").await;
    let combined_session = h.engine.add_unit_item(&combined, "p-1", 5).await.unwrap();

    assert_eq!(merged_session.surviving_count(), 1);
    assert_eq!(merged_session.totals, combined_session.totals);
}

#[tokio::test]
async fn test_re_adding_weight_product_replaces_weight() {
    let h = harness().await;
    seed(&h.db, &weight_product("p-1", 2000)).await;
    let id = open_tab(&h, "Tab 1").await;

    h.engine.add_weight_item(&id, "p-1", dec("1.5")).await.unwrap();
    let session = h.engine.add_weight_item(&id, "p-1", dec("2.0")).await.unwrap();

    assert_eq!(session.surviving_count(), 1);
    assert_eq!(session.totals.subtotal.cents(), 4000);
}

#[tokio::test]
async fn test_weight_rounded_to_product_precision() {
    let h = harness_with(EngineConfig::default()).await; // zero tax
    let mut coarse = weight_product("p-1", 1000);
    coarse.weight_precision = 2;
    seed(&h.db, &coarse).await;
    let id = open_tab(&h, "Tab 1").await;

    // 1.555 kg → 1.56 kg at precision 2 → $15.60
    let session = h.engine.add_weight_item(&id, "p-1", dec("1.555")).await.unwrap();
    assert_eq!(session.totals.subtotal.cents(), 1560);
}

#[tokio::test]
async fn test_pricing_mode_entry_points_are_exclusive() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-unit", 1000)).await;
    seed(&h.db, &weight_product("p-kg", 2000)).await;
    let id = open_tab(&h, "Tab 1").await;

    let err = h.engine.add_unit_item(&id, "p-kg", 1).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Domain(CoreError::WeightBasedProduct { .. })
    ));

    let err = h
        .engine
        .add_weight_item(&id, "p-unit", dec("1.0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Domain(CoreError::UnitPricedProduct { .. })
    ));
}

#[tokio::test]
async fn test_update_quantity_zero_equals_remove() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;

    let via_update = open_tab(&h, "Update").await;
    let s = h.engine.add_unit_item(&via_update, "p-1", 2).await.unwrap();
    let line = s.items[0].id.clone();
    let updated = h.engine.update_quantity(&via_update, &line, 0).await.unwrap();

    let via_remove = open_tab(&h, "Remove").await;
    let s = h.engine.add_unit_item(&via_remove, "p-1", 2).await.unwrap();
    let line = s.items[0].id.clone();
    let removed = h.engine.remove_item(&via_remove, &line).await.unwrap();

    for session in [&updated, &removed] {
        assert_eq!(session.surviving_count(), 0);
        assert_eq!(session.items.len(), 1); // tombstone kept for audit
        assert!(session.items[0].removed);
        assert!(session.items[0].removed_at.is_some());
        assert_eq!(session.totals.final_total.cents(), 0);
    }
}

#[tokio::test]
async fn test_update_weight_replaces_reading() {
    let h = harness_with(EngineConfig::default()).await; // zero tax
    seed(&h.db, &weight_product("p-1", 2000)).await;
    seed(&h.db, &unit_product("p-2", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;
    let s = h.engine.add_weight_item(&id, "p-1", dec("1.5")).await.unwrap();
    let line = s.items[0].id.clone();

    // A re-weigh replaces the reading and reprices the line
    let session = h.engine.update_weight(&id, &line, dec("0.75")).await.unwrap();
    assert_eq!(session.totals.subtotal.cents(), 1500);

    // Zero dispatches to removal, like update_quantity
    let session = h.engine.update_weight(&id, &line, dec("0")).await.unwrap();
    assert_eq!(session.surviving_count(), 0);
    assert!(session.items[0].removed);

    // The weight entry point never touches unit-priced lines, zero
    // included: removal of a unit line goes through update_quantity
    let s = h.engine.add_unit_item(&id, "p-2", 1).await.unwrap();
    let unit_line = s.items.iter().find(|i| !i.removed).unwrap().id.clone();
    for reading in ["1.0", "0"] {
        let err = h
            .engine
            .update_weight(&id, &unit_line, dec(reading))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Domain(CoreError::UnitPricedProduct { .. })
        ));
    }
    let stored = h.engine.session(&id).await.unwrap();
    assert_eq!(stored.surviving_count(), 1);
}

#[tokio::test]
async fn test_update_quantity_negative_rejected() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;
    let s = h.engine.add_unit_item(&id, "p-1", 2).await.unwrap();
    let line = s.items[0].id.clone();

    let err = h.engine.update_quantity(&id, &line, -1).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[tokio::test]
async fn test_discount_bounded_by_line_subtotal() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;
    let s = h.engine.add_unit_item(&id, "p-1", 2).await.unwrap(); // gross $20.00
    let line = s.items[0].id.clone();

    let session = h
        .engine
        .update_discount(&id, &line, Money::from_cents(500))
        .await
        .unwrap();
    // Tax charged on the discounted line: (2000 - 500) × 10% = 150
    assert_eq!(session.totals.subtotal.cents(), 2000);
    assert_eq!(session.totals.total_discount.cents(), 500);
    assert_eq!(session.totals.total_tax.cents(), 150);
    assert_eq!(session.totals.final_total.cents(), 1650);

    let err = h
        .engine
        .update_discount(&id, &line, Money::from_cents(2001))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}

#[tokio::test]
async fn test_recalculate_totals_is_idempotent() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 333)).await;
    let id = open_tab(&h, "Tab 1").await;
    h.engine.add_unit_item(&id, "p-1", 3).await.unwrap();

    let first = h.engine.recalculate_totals(&id).await.unwrap();
    let second = h.engine.recalculate_totals(&id).await.unwrap();
    assert_eq!(first.totals, second.totals);
}

#[tokio::test]
async fn test_unknown_product_and_session_not_found() {
    let h = harness().await;
    let id = open_tab(&h, "Tab 1").await;

    let err = h.engine.add_unit_item(&id, "ghost", 1).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));

    let err = h.engine.add_unit_item("ghost", "ghost", 1).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));
}

// =============================================================================
// Stock Checks (fail-open)
// =============================================================================

#[tokio::test]
async fn test_confirmed_insufficient_stock_blocks() {
    let h = harness().await;
    let mut tracked = unit_product("p-1", 1000);
    tracked.track_inventory = true;
    seed(&h.db, &tracked).await;
    h.stock.set_level("p-1", 3);
    let id = open_tab(&h, "Tab 1").await;

    let err = h.engine.add_unit_item(&id, "p-1", 5).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InsufficientStock {
            available: 3,
            requested: 5,
            ..
        }
    ));

    // Exactly the available quantity is fine
    h.engine.add_unit_item(&id, "p-1", 3).await.unwrap();

    // The merge would take the line to 4: blocked against the same level
    let err = h.engine.add_unit_item(&id, "p-1", 1).await.unwrap_err();
    assert!(matches!(err, SessionError::InsufficientStock { .. }));
}

#[tokio::test]
async fn test_unreachable_stock_source_fails_open() {
    let h = harness().await;
    let mut tracked = unit_product("p-1", 1000);
    tracked.track_inventory = true;
    seed(&h.db, &tracked).await;
    h.stock.set_unreachable(true);
    let id = open_tab(&h, "Tab 1").await;

    // Warning-level only: the sale goes through
    let session = h.engine.add_unit_item(&id, "p-1", 100).await.unwrap();
    assert_eq!(session.surviving_count(), 1);
}

#[tokio::test]
async fn test_validate_reports_stock_softly() {
    let h = harness().await;
    let mut tracked = unit_product("p-1", 1000);
    tracked.track_inventory = true;
    seed(&h.db, &tracked).await;
    h.stock.set_level("p-1", 5);
    let id = open_tab(&h, "Tab 1").await;
    h.engine.add_unit_item(&id, "p-1", 3).await.unwrap();

    // Healthy: no issues
    let report = h.engine.validate(&id).await.unwrap();
    assert!(report.is_valid);
    assert!(report.issues.is_empty());

    // Unreachable source: warning, still valid
    h.stock.set_unreachable(true);
    let report = h.engine.validate(&id).await.unwrap();
    assert!(report.is_valid);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].severity, IssueSeverity::Warning);

    // Confirmed shortfall: error, invalid
    h.stock.set_unreachable(false);
    h.stock.set_level("p-1", 1);
    let report = h.engine.validate(&id).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.issues[0].severity, IssueSeverity::Error);
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test]
async fn test_complete_requires_surviving_items() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;

    let err = h.engine.complete(&id, PaymentMethod::Cash).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptySession { .. }));

    // A grid holding only tombstones is still empty
    let s = h.engine.add_unit_item(&id, "p-1", 1).await.unwrap();
    let line = s.items[0].id.clone();
    h.engine.remove_item(&id, &line).await.unwrap();
    let err = h.engine.complete(&id, PaymentMethod::Cash).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptySession { .. }));
}

#[tokio::test]
async fn test_complete_creates_permanent_sale() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-a", 1000)).await;
    seed(&h.db, &weight_product("p-b", 2000)).await;
    let id = open_tab(&h, "Tab 1").await;
    h.engine.add_unit_item(&id, "p-a", 2).await.unwrap();
    h.engine.add_weight_item(&id, "p-b", dec("1.5")).await.unwrap();

    let session = h.engine.complete(&id, PaymentMethod::Cash).await.unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(!session.is_active);
    let sale_id = session.sale_id.clone().unwrap();

    let sale = h.db.sales().fetch(&sale_id).await.unwrap().unwrap();
    assert_eq!(sale.status, SaleStatus::Completed);
    assert_eq!(sale.payment_method, Some(PaymentMethod::Cash));
    assert_eq!(sale.subtotal_cents, 5000);
    assert_eq!(sale.tax_cents, 500);
    assert_eq!(sale.total_cents, 5500);
    assert!(sale.completed_at.is_some());

    let items = h.db.sales().fetch_items(&sale_id).await.unwrap();
    assert_eq!(items.len(), 2);
    let weighed = items.iter().find(|i| i.sku_snapshot == "SKU-p-b").unwrap();
    assert_eq!(weighed.quantity, dec("1.5"));
    assert_eq!(weighed.line_total_cents, 3000);
}

#[tokio::test]
async fn test_completed_session_refuses_further_mutation() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;
    let s = h.engine.add_unit_item(&id, "p-1", 1).await.unwrap();
    let line = s.items[0].id.clone();
    h.engine.complete(&id, PaymentMethod::Cash).await.unwrap();

    let err = h.engine.add_unit_item(&id, "p-1", 1).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));
    let err = h.engine.update_quantity(&id, &line, 2).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));
    let err = h.engine.suspend(&id).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));
    let err = h.engine.complete(&id, PaymentMethod::Cash).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));

    // A completed tab frees its name and its quota slot
    h.engine
        .create_session("Tab 1", "shop-1", "user-1", "dev-1", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_complete_excludes_tombstoned_lines() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-a", 1000)).await;
    seed(&h.db, &unit_product("p-b", 500)).await;
    let id = open_tab(&h, "Tab 1").await;
    let s = h.engine.add_unit_item(&id, "p-a", 1).await.unwrap();
    let line_a = s.items[0].id.clone();
    h.engine.add_unit_item(&id, "p-b", 1).await.unwrap();
    h.engine.remove_item(&id, &line_a).await.unwrap();

    let session = h.engine.complete(&id, PaymentMethod::ExternalCard).await.unwrap();
    let items = h
        .db
        .sales()
        .fetch_items(&session.sale_id.unwrap())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].sku_snapshot, "SKU-p-b");
}

// =============================================================================
// Suspend / Resume / Close
// =============================================================================

#[tokio::test]
async fn test_suspend_and_resume_toggle() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;
    let id = open_tab(&h, "Tab 1").await;

    let session = h.engine.suspend(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Suspended);

    // Suspended tabs stay editable
    h.engine.add_unit_item(&id, "p-1", 1).await.unwrap();

    // Idempotent no-ops
    assert_eq!(
        h.engine.suspend(&id).await.unwrap().state,
        SessionState::Suspended
    );
    let session = h.engine.resume(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(
        h.engine.resume(&id).await.unwrap().state,
        SessionState::Active
    );
}

#[tokio::test]
async fn test_close_keeps_or_discards_grid() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-1", 1000)).await;

    let kept = open_tab(&h, "Kept").await;
    h.engine.add_unit_item(&kept, "p-1", 2).await.unwrap();
    let session = h.engine.close(&kept, true).await.unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(!session.is_active);
    let stored = h.engine.session(&kept).await.unwrap();
    assert_eq!(stored.items.len(), 1); // grid kept for audit
    assert_eq!(stored.totals.subtotal.cents(), 2000);

    let discarded = open_tab(&h, "Discarded").await;
    h.engine.add_unit_item(&discarded, "p-1", 2).await.unwrap();
    h.engine.close(&discarded, false).await.unwrap();
    let stored = h.engine.session(&discarded).await.unwrap();
    assert!(stored.items.is_empty());
    assert_eq!(stored.totals.final_total.cents(), 0);

    // Cancelled is terminal
    let err = h.engine.add_unit_item(&kept, "p-1", 1).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));
}

// =============================================================================
// Expiry Sweep
// =============================================================================

#[tokio::test]
async fn test_cleanup_expired_runs_idempotently() {
    let h = harness().await;
    open_tab(&h, "Tab 0").await;
    let suspended = open_tab(&h, "Tab 1").await;
    h.engine.suspend(&suspended).await.unwrap();

    // Nothing is stale yet
    let past = Utc::now() - Duration::hours(1);
    assert_eq!(h.engine.cleanup_expired(past).await.unwrap(), 0);

    // Both open sessions predate a future threshold
    let future = Utc::now() + Duration::hours(1);
    assert_eq!(h.engine.cleanup_expired(future).await.unwrap(), 2);
    assert_eq!(h.engine.cleanup_expired(future).await.unwrap(), 0);

    let stored = h.engine.session(&suspended).await.unwrap();
    assert_eq!(stored.state, SessionState::Expired);

    let err = h.engine.switch_to(&suspended).await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSession { .. }));
}

#[tokio::test]
async fn test_switch_to_bumps_activity() {
    let h = harness().await;
    let id = open_tab(&h, "Tab 1").await;
    let before = h.engine.session(&id).await.unwrap().updated_at;

    let touched = h.engine.switch_to(&id).await.unwrap();
    assert!(touched.updated_at >= before);

    let stored = h.engine.session(&id).await.unwrap();
    assert_eq!(stored.updated_at, touched.updated_at);
}

// =============================================================================
// Save State / Update Session
// =============================================================================

#[tokio::test]
async fn test_save_state_replaces_the_grid() {
    let h = harness().await;
    seed(&h.db, &unit_product("p-a", 1000)).await;
    seed(&h.db, &weight_product("p-b", 2000)).await;
    let id = open_tab(&h, "Tab 1").await;
    h.engine.add_unit_item(&id, "p-a", 5).await.unwrap();

    let session = h
        .engine
        .save_state(
            &id,
            &[
                GridEntry::Unit {
                    product_id: "p-a".to_string(),
                    quantity: 1,
                    discount_cents: 100,
                },
                GridEntry::Weight {
                    product_id: "p-b".to_string(),
                    weight: dec("0.5"),
                    discount_cents: 0,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(session.surviving_count(), 2);
    // 1 × $10.00 − $1.00 + 0.5 kg × $20.00/kg = $19.00 before tax
    assert_eq!(session.totals.subtotal.cents(), 2000);
    assert_eq!(session.totals.total_discount.cents(), 100);
    // tax 10% on (900 + 1000) = 190
    assert_eq!(session.totals.total_tax.cents(), 190);
    assert_eq!(session.totals.final_total.cents(), 2090);
}

#[tokio::test]
async fn test_update_session_partial_fields() {
    let h = harness().await;
    let id = open_tab(&h, "Tab 1").await;

    let session = h
        .engine
        .update_session(UpdateSessionRequest {
            session_id: id.clone(),
            tab_name: Some("Renamed".to_string()),
            payment_method: Some(PaymentMethod::Cash),
            customer_id: Some("cust-1".to_string()),
            grid: None,
        })
        .await
        .unwrap();

    assert_eq!(session.tab_name, "Renamed");
    assert_eq!(session.payment_method, Some(PaymentMethod::Cash));
    assert_eq!(session.customer_id.as_deref(), Some("cust-1"));

    let stored = h.engine.session(&id).await.unwrap();
    assert_eq!(stored.tab_name, "Renamed");
}

#[tokio::test]
async fn test_rename_into_open_tab_name_rejected() {
    let h = harness().await;
    open_tab(&h, "Tab A").await;
    let id = open_tab(&h, "Tab B").await;

    let err = h
        .engine
        .update_session(UpdateSessionRequest {
            session_id: id.clone(),
            tab_name: Some("Tab A".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateTabName { .. }));

    // The store kept the last committed state
    let stored = h.engine.session(&id).await.unwrap();
    assert_eq!(stored.tab_name, "Tab B");
}
