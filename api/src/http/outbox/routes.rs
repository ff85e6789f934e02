use axum::{
    Router,
    routing::{get, post},
};

use crate::http::{
    outbox::handlers::{get_outbox_entry, list_failed_entries, requeue_entry},
    server::AppState,
};

pub fn outbox_routes() -> Router<AppState> {
    Router::new()
        .route("/outbox/failed", get(list_failed_entries))
        .route("/outbox/{id}", get(get_outbox_entry))
        .route("/outbox/{id}/requeue", post(requeue_entry))
}
