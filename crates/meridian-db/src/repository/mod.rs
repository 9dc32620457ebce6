//! # Repository Module
//!
//! Database repository implementations for Meridian POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Engine operation                                                      │
//! │       │                                                                 │
//! │       │  db.sessions().count_open("user-1", "dev-1")                   │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  SessionRepository                                                     │
//! │  ├── insert(&self, session)                                            │
//! │  ├── fetch(&self, id)                                                  │
//! │  ├── update(&self, session)      ← the single writer path              │
//! │  └── expire_stale(&self, threshold)                                    │
//! │       │                                                                 │
//! │       │  SQL Query                                                     │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Clean separation of concerns                                        │
//! │  • Easy to test (in-memory database)                                   │
//! │  • SQL is isolated in one place                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`session::SessionRepository`] - The session store (rows + snapshots)
//! - [`sale::SaleRepository`] - Permanent sale records and their items
//! - [`product::ProductRepository`] - Catalog and stock reads

pub mod product;
pub mod sale;
pub mod session;
