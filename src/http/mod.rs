//! HTTP API subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, body → TransactionIntent)
//!     → handlers.rs (pipeline calls)
//!     → response.rs (receipt / error → status code + JSON)
//!     → Send to client
//! ```
//!
//! # Routes
//! - `POST /v1/intents`
//! - `POST /v1/claims/reward`
//! - `GET /v1/receipts/{key}`
//! - `GET /health`

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
