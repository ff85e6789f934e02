use outbox_core::{DispatchStats, domain::outbox::ports::OutboxAdmin};
use std::sync::Arc;

pub type DynOutboxAdmin = Arc<dyn OutboxAdmin>;

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub admin: DynOutboxAdmin,
    pub stats: Arc<DispatchStats>,
}

impl AppState {
    /// Create a new AppState over the outbox admin port and the dispatcher's counters
    pub fn new(admin: DynOutboxAdmin, stats: Arc<DispatchStats>) -> Self {
        Self { admin, stats }
    }
}
