//! # meridian-session: The Multi-Session Sale Engine
//!
//! One user/device holds several independent, concurrently-editable sale
//! tabs; this crate orchestrates them.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Meridian POS Session Engine                          │
//! │                                                                         │
//! │  Caller (API layer, device runtime)                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              ★ meridian-session (THIS CRATE) ★                  │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  manager  │  │   locks   │  │  traits   │  │ adapters  │  │   │
//! │  │   │ Session   │  │ per-key   │  │ catalog   │  │ SQLite +  │  │   │
//! │  │   │ Manager   │  │ mutexes   │  │ stock tax │  │ pure      │  │   │
//! │  │   └─────┬─────┘  └───────────┘  │ scale sale│  │ defaults  │  │   │
//! │  │         │                       └───────────┘  └───────────┘  │   │
//! │  └─────────┼───────────────────────────────────────────────────────┘   │
//! │            │                                                            │
//! │            ├──► meridian-core   (grid math, lifecycle, validation)     │
//! │            └──► meridian-db     (session store, sales, catalog)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! - Sessions are the unit of parallelism: tabs of different sessions
//!   never contend.
//! - All mutations of one session serialize on its keyed lock; the stored
//!   row and its JSON snapshot are rewritten together, so readers never
//!   observe a half-applied mutation.
//! - `create_session` serializes on a (user, device) owner lock so the
//!   quota check cannot race itself; the partial unique tab index is the
//!   transactional backstop.
//! - A mutation that discovers its session reached a terminal state
//!   concurrently aborts with `StaleSession` rather than overwriting the
//!   terminal result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_db::{Database, DbConfig};
//! use meridian_session::{EngineConfig, SessionManager};
//!
//! let db = Database::new(DbConfig::new("./meridian.db")).await?;
//! let engine = SessionManager::builder(db)
//!     .config(EngineConfig::default().max_open_sessions(5))
//!     .build();
//!
//! let session = engine
//!     .create_session("Table 4", "shop-1", "user-1", "dev-1", None)
//!     .await?;
//! let session = engine.add_unit_item(&session.id, "product-1", 2).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapters;
pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod traits;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::EngineConfig;
pub use error::{SessionError, SessionResult};
pub use manager::{
    GridEntry, IssueSeverity, SessionManager, SessionManagerBuilder, UpdateSessionRequest,
    ValidationIssue, ValidationReport,
};
pub use traits::{ProductCatalog, SalePersistence, StockLevel, TaxConfiguration, WeightPricing};
