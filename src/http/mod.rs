//! HTTP transport layer
//!
//! Bridges axum requests into dispatches and hosts the built-in endpoints.

pub mod handlers;
