//! # Session Repository
//!
//! The durable session store: one row per sale tab, carrying both the
//! queryable columns and the serialized grid snapshot.
//!
//! ## Row ⇄ Snapshot Consistency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    The Single Writer Path                               │
//! │                                                                         │
//! │  Engine mutation (items changed, totals recomputed)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SessionRepository::update(&session)                                   │
//! │       │                                                                 │
//! │       ├── snapshot = serialize(items + totals)   ← derived, never      │
//! │       │                                            accepted from       │
//! │       │                                            outside             │
//! │       ▼                                                                 │
//! │  UPDATE sessions SET <columns>, snapshot = ?                           │
//! │   WHERE id = ? AND state IN ('active','suspended')                     │
//! │       │                                                                 │
//! │       ├── rows_affected = 1 → columns and snapshot agree, committed    │
//! │       └── rows_affected = 0 → session went terminal concurrently;      │
//! │                               nothing written, caller aborts           │
//! │                                                                         │
//! │  There is no code path that writes the columns without the snapshot    │
//! │  or vice versa.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use meridian_core::session::{LineItem, Session, SessionTotals};

/// The serialized form of a session's grid: items plus derived totals.
///
/// Stored as JSON in the `snapshot` column for fast tab reload without
/// re-joining item rows.
#[derive(Debug, Serialize, Deserialize)]
struct GridSnapshot {
    items: Vec<LineItem>,
    totals: SessionTotals,
}

fn encode_snapshot(session: &Session) -> DbResult<String> {
    let snapshot = GridSnapshot {
        items: session.items.clone(),
        totals: session.totals,
    };
    serde_json::to_string(&snapshot).map_err(|e| DbError::snapshot(&session.id, e.to_string()))
}

fn row_to_session(row: &SqliteRow) -> DbResult<Session> {
    let id: String = row.try_get("id")?;
    let snapshot_json: String = row.try_get("snapshot")?;
    let snapshot: GridSnapshot = serde_json::from_str(&snapshot_json)
        .map_err(|e| DbError::snapshot(&id, e.to_string()))?;

    Ok(Session {
        id,
        tab_name: row.try_get("tab_name")?,
        shop_id: row.try_get("shop_id")?,
        user_id: row.try_get("user_id")?,
        device_id: row.try_get("device_id")?,
        customer_id: row.try_get("customer_id")?,
        payment_method: row.try_get("payment_method")?,
        state: row.try_get("state")?,
        sale_id: row.try_get("sale_id")?,
        items: snapshot.items,
        totals: snapshot.totals,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SESSION_COLUMNS: &str = "id, tab_name, shop_id, user_id, device_id, customer_id, \
     payment_method, state, sale_id, is_active, snapshot, created_at, updated_at";

/// Repository for session database operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Creates a new SessionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    /// Inserts a freshly created session.
    ///
    /// The partial unique index on open tab names turns a duplicate-tab
    /// race into `DbError::UniqueViolation` here, regardless of what the
    /// caller checked beforehand.
    pub async fn insert(&self, session: &Session) -> DbResult<()> {
        debug!(id = %session.id, tab = %session.tab_name, "Inserting session");

        let snapshot = encode_snapshot(session)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, tab_name, shop_id, user_id, device_id, customer_id,
                payment_method, state, sale_id, is_active, snapshot,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&session.id)
        .bind(&session.tab_name)
        .bind(&session.shop_id)
        .bind(&session.user_id)
        .bind(&session.device_id)
        .bind(&session.customer_id)
        .bind(session.payment_method)
        .bind(session.state)
        .bind(&session.sale_id)
        .bind(session.is_active)
        .bind(&snapshot)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a session by ID.
    pub async fn fetch(&self, id: &str) -> DbResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    /// Lists the open (Active/Suspended) sessions for one (user, device).
    pub async fn list_open(&self, user_id: &str, device_id: &str) -> DbResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = ?1 AND device_id = ?2 \
               AND state IN ('active', 'suspended') \
             ORDER BY created_at"
        ))
        .bind(user_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// Counts open sessions for one (user, device); the quota input.
    pub async fn count_open(&self, user_id: &str, device_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions \
             WHERE user_id = ?1 AND device_id = ?2 \
               AND state IN ('active', 'suspended')",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Whether an open session with this tab name already exists for the
    /// (user, device).
    pub async fn open_tab_exists(
        &self,
        user_id: &str,
        device_id: &str,
        tab_name: &str,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions \
             WHERE user_id = ?1 AND device_id = ?2 AND tab_name = ?3 \
               AND state IN ('active', 'suspended')",
        )
        .bind(user_id)
        .bind(device_id)
        .bind(tab_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// The single writer path: rewrites every mutable column and the
    /// re-serialized snapshot together.
    ///
    /// Guarded on the stored state still being open, so a session that
    /// reached a terminal state concurrently is left untouched and the
    /// caller gets `NotFound` ("Open session") to abort on.
    ///
    /// Terminal transitions themselves go through here too: the guard
    /// checks the *stored* state, the bound value carries the *new* one.
    pub async fn update(&self, session: &Session) -> DbResult<()> {
        debug!(
            id = %session.id,
            state = %session.state,
            items = session.items.len(),
            "Persisting session"
        );

        let snapshot = encode_snapshot(session)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                tab_name = ?2,
                customer_id = ?3,
                payment_method = ?4,
                state = ?5,
                sale_id = ?6,
                is_active = ?7,
                snapshot = ?8,
                updated_at = ?9
            WHERE id = ?1 AND state IN ('active', 'suspended')
            "#,
        )
        .bind(&session.id)
        .bind(&session.tab_name)
        .bind(&session.customer_id)
        .bind(session.payment_method)
        .bind(session.state)
        .bind(&session.sale_id)
        .bind(session.is_active)
        .bind(&snapshot)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Open session", &session.id));
        }

        Ok(())
    }

    /// Bumps a session's activity timestamp without touching content.
    pub async fn touch(&self, id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET updated_at = ?2 \
             WHERE id = ?1 AND state IN ('active', 'suspended')",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Open session", id));
        }

        Ok(())
    }

    /// Bulk-expires every open session whose last activity predates the
    /// threshold. Returns the number of sessions transitioned.
    ///
    /// Running it twice with no intervening activity transitions zero
    /// additional sessions: the first pass moved them out of the open
    /// states the WHERE clause matches.
    pub async fn expire_stale(&self, threshold: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET state = 'expired', is_active = 0 \
             WHERE state IN ('active', 'suspended') AND updated_at < ?1",
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use meridian_core::lifecycle::SessionState;
    use meridian_core::types::{Product, TaxRate};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn test_product(id: &str, price_cents: i64) -> Product {
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

    fn test_session(id: &str, tab: &str) -> Session {
        Session::new(id, tab, "shop-1", "user-1", "dev-1", None)
    }

    #[tokio::test]
    async fn test_insert_and_fetch_round_trip() {
        let db = test_db().await;
        let repo = db.sessions();

        let mut session = test_session("s-1", "Tab 1");
        session.add_unit_item(&test_product("p-1", 999), 2).unwrap();
        session.recalculate(TaxRate::from_bps(1000));

        repo.insert(&session).await.unwrap();

        let loaded = repo.fetch("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.tab_name, "Tab 1");
        assert_eq!(loaded.state, SessionState::Active);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.totals, session.totals);
    }

    #[tokio::test]
    async fn test_duplicate_open_tab_rejected_by_index() {
        let db = test_db().await;
        let repo = db.sessions();

        repo.insert(&test_session("s-1", "Tab 1")).await.unwrap();

        let err = repo.insert(&test_session("s-2", "Tab 1")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_tab_name_reusable_after_termination() {
        let db = test_db().await;
        let repo = db.sessions();

        let mut session = test_session("s-1", "Tab 1");
        repo.insert(&session).await.unwrap();

        // Cancel through the writer path, then the name is free again
        session.state = SessionState::Cancelled;
        session.is_active = false;
        repo.update(&session).await.unwrap();

        repo.insert(&test_session("s-2", "Tab 1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_refuses_terminal_session() {
        let db = test_db().await;
        let repo = db.sessions();

        let mut session = test_session("s-1", "Tab 1");
        repo.insert(&session).await.unwrap();

        session.state = SessionState::Completed;
        repo.update(&session).await.unwrap();

        // The row is terminal now; the guarded update matches nothing
        session.tab_name = "Renamed".to_string();
        let err = repo.update(&session).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let stored = repo.fetch("s-1").await.unwrap().unwrap();
        assert_eq!(stored.tab_name, "Tab 1");
        assert_eq!(stored.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_count_open_and_list_open() {
        let db = test_db().await;
        let repo = db.sessions();

        repo.insert(&test_session("s-1", "Tab 1")).await.unwrap();
        repo.insert(&test_session("s-2", "Tab 2")).await.unwrap();

        let mut suspended = test_session("s-3", "Tab 3");
        suspended.state = SessionState::Suspended;
        repo.insert(&suspended).await.unwrap();

        assert_eq!(repo.count_open("user-1", "dev-1").await.unwrap(), 3);
        assert_eq!(repo.count_open("user-1", "dev-2").await.unwrap(), 0);

        let open = repo.list_open("user-1", "dev-1").await.unwrap();
        assert_eq!(open.len(), 3);
    }

    #[tokio::test]
    async fn test_expire_stale_is_idempotent() {
        let db = test_db().await;
        let repo = db.sessions();

        repo.insert(&test_session("s-1", "Tab 1")).await.unwrap();
        repo.insert(&test_session("s-2", "Tab 2")).await.unwrap();

        let future = Utc::now() + Duration::hours(1);
        assert_eq!(repo.expire_stale(future).await.unwrap(), 2);
        assert_eq!(repo.expire_stale(future).await.unwrap(), 0);

        let stored = repo.fetch("s-1").await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Expired);
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_touch_bumps_updated_at() {
        let db = test_db().await;
        let repo = db.sessions();

        let session = test_session("s-1", "Tab 1");
        repo.insert(&session).await.unwrap();

        let later = Utc::now() + Duration::minutes(5);
        repo.touch("s-1", later).await.unwrap();

        let stored = repo.fetch("s-1").await.unwrap().unwrap();
        assert!(stored.updated_at > session.updated_at);
    }
}
