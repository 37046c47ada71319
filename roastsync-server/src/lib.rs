//! roastsync-server library
//!
//! Roast synchronisation server for the desktop roasting client: roast
//! upsert with exactly-once stock deduction, profile resolution, QC goal
//! evaluation and production-task notifications.

#![recursion_limit = "256"]

use axum::Router;
use roastsync_common::events::NotificationHub;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod api;
pub mod blends;
pub mod db;
pub mod error;
pub mod profile;
pub mod qc;
pub mod scheduler;
pub mod sync;

pub use error::{ApiError, ApiResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// User-addressed notification fan-out
    pub hub: NotificationHub,
    /// Caller identity when no `X-User-Id` header is sent
    pub default_user: Uuid,
    /// Starting stock of coffees created on first reference
    pub placeholder_stock: Decimal,
    /// Legacy profile files live here
    pub profiles_dir: PathBuf,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        hub: NotificationHub,
        default_user: Uuid,
        placeholder_stock: Decimal,
        profiles_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            hub,
            default_user,
            placeholder_stock,
            profiles_dir,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let roasts = Router::new()
        .route("/api/v1/aroast", post(api::roasts::upsert_roast))
        .route(
            "/api/v1/roasts",
            get(api::roasts::list_roasts).post(api::roasts::upsert_roast),
        )
        .route(
            "/api/v1/roasts/:roast_id",
            get(api::roasts::get_roast)
                .patch(api::roasts::patch_roast)
                .delete(api::roasts::delete_roast),
        )
        .route(
            "/api/v1/roasts/:roast_id/profile",
            get(api::profiles::download_profile).post(api::profiles::upload_profile),
        )
        .route(
            "/api/v1/roasts/:roast_id/profile/data",
            get(api::profiles::profile_data),
        );

    let references = Router::new()
        .route("/api/v1/references", get(api::references::list_references))
        .route(
            "/api/v1/roasts/:roast_id/reference",
            post(api::references::mark_reference).delete(api::references::unmark_reference),
        )
        .route(
            "/api/v1/roasts/:roast_id/reference/replace",
            post(api::references::replace_reference),
        );

    let catalogue = Router::new()
        .route(
            "/api/v1/blends",
            get(api::blends::list_blends).post(api::blends::create_blend),
        )
        .route(
            "/api/v1/blends/:blend_id",
            get(api::blends::get_blend)
                .patch(api::blends::update_blend)
                .delete(api::blends::delete_blend),
        )
        .route(
            "/api/v1/goals",
            get(api::goals::list_goals).post(api::goals::create_goal),
        )
        .route(
            "/api/v1/goals/:goal_id",
            get(api::goals::get_goal)
                .patch(api::goals::update_goal)
                .delete(api::goals::delete_goal),
        );

    let tasks = Router::new()
        .route(
            "/api/v1/tasks/history/:history_id/complete",
            post(api::tasks::complete_history),
        )
        .route(
            "/api/v1/tasks/history/:history_id/snooze",
            post(api::tasks::snooze_history),
        )
        .route(
            "/api/v1/notifications/stream",
            get(api::notifications::notification_stream),
        );

    Router::new()
        .merge(roasts)
        .merge(references)
        .merge(catalogue)
        .merge(tasks)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
