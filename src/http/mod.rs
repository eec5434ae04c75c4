//! HTTP embedding of the whiteboard.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, tracing)
//!     → admin.rs for /admin/* (runtime introspection)
//!     → otherwise Whiteboard::route → servlet response
//!     → filter chain (header filters)
//!     → on 4xx/5xx or no match: error page of the context, then the default context
//!     → Send to client
//! ```

pub mod admin;
pub mod server;

pub use server::{AppState, HttpServer};
