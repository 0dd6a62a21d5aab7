//! HTTP server exposing the cache.
//!
//! - [`http_api`]: Request/response types and route handlers

pub mod http_api;
