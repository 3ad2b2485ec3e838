// API route aggregation.
pub mod chat;
pub mod errors;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new().merge(chat::router()).with_state(state)
}
