//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the lab controller
//! every handler works through.

use ailab_core::LabController;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LabController>,
}
