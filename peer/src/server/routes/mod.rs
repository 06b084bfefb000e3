//! HTTP route definitions.

mod health;
mod records;

use super::AppState;
use crate::store::LocalStore;
use axum::Router;

/// Create all application routes.
pub fn create_routes<S: LocalStore>() -> Router<AppState<S>> {
    Router::new()
        .merge(health::routes())
        .merge(records::routes())
}
