//! AI Lab API Library Crate
//!
//! This library contains the web-facing side of the AI Lab: configuration,
//! application state, HTTP handlers and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
