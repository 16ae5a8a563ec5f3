//! Ouvidoria: manifestation lifecycle and query engine.
//!
//! ## Overview
//!
//! Citizens submit manifestations (complaints, suggestions, requests,
//! reports, compliments) and receive a protocol number. Staff move each
//! manifestation through a fixed status lifecycle and append responses.
//! Citizens later look their manifestation up by protocol alone.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, ApiError)         │
//! └──────────┘          │         │                                        │
//!                       │         v                                        │
//!                       │  gateway.rs  (QueryGateway, retry on Conflict)   │
//!                       │         │                                        │
//!                       │   ┌─────┴──────────┬──────────────┐              │
//!                       │   v                v              v              │
//!                       │ lifecycle.rs    ledger.rs     protocol.rs        │
//!                       │ (Status, FSM)   (responses)   (YYYY-NNNNNN)      │
//!                       │   └─────┬──────────┴──────────────┘              │
//!                       │         v                                        │
//!                       │  db.rs  (ManifestationDb, DbHandle, SQLite)      │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `models`  | Entities, drafts, filters, pages and redacted views         |
//! | `clock`   | `Clock` trait; `SystemClock` and `FixedClock`               |
//!
//! ## Write Path (status change)
//!
//! 1. `PATCH /api/admin/manifestacoes/{id}/status` → `QueryGateway::update_status`
//! 2. The gateway runs `LifecycleEngine::transition` on the blocking pool.
//! 3. Inside one `BEGIN IMMEDIATE` transaction the engine reads status and
//!    row version, checks the edge, and writes conditionally on the version.
//! 4. A lost race surfaces as `Conflict`; the gateway retries a bounded
//!    number of times against fresh state.

pub mod api;
pub mod clock;
pub mod db;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod protocol;
pub mod server;
