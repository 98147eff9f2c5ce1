//! HTTP surface: one route family, `/api/issues/{project}`.
//!
//! Every response, success or failure, is HTTP 200 with a JSON body; callers
//! detect failure by an `error` key in the body. That is the wire contract,
//! not an accident.

mod handlers;

pub mod error;

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::Database;

/// Shared request state. The store handle is injected here at construction
/// so tests can stand up isolated instances.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/issues/{project}",
            get(handlers::list)
                .post(handlers::create)
                .put(handlers::update)
                .delete(handlers::remove),
        )
        // A request that never supplied a project segment at all.
        .route("/api/issues", any(handlers::no_project))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
