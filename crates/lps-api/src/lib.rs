//! HTTP and WebSocket surface of the loan system.
//!
//! `routes::build_router` is the single entry point; `main.rs` attaches
//! middleware and starts the server plus the database change listener.
//! Handlers are `pub(crate)`; scenario tests compose the bare router.

pub mod api_types;
pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;
