pub mod cli;
pub mod config;
pub mod db;
pub mod directory;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::directory::DirectoryClient;
use crate::services::lifecycle::LifecycleService;
use crate::services::notifier::{HttpNotifier, NoopNotifier, NotificationDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub directory: DirectoryClient,
    pub lifecycle: LifecycleService,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: &Config) -> Self {
        let directory = DirectoryClient::new(config.directory_base_url.clone());
        let notifier: Arc<dyn NotificationDispatcher> = match &config.notifier_base_url {
            Some(base_url) => Arc::new(HttpNotifier::new(base_url.clone())),
            None => Arc::new(NoopNotifier),
        };
        let lifecycle = LifecycleService::new(
            db.clone(),
            directory.clone(),
            notifier,
            config.qr_base_url.clone(),
            config.require_purchase_amount,
        );

        AppState {
            db,
            directory,
            lifecycle,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Coupon surface. Static segments are registered alongside /:id;
        // axum resolves the static match first.
        .route(
            "/coupons",
            get(handlers::coupons::list_coupons).post(handlers::coupons::create_coupon),
        )
        .route("/coupons/packages", get(handlers::coupons::get_packages))
        .route("/coupons/purchase", post(handlers::coupons::purchase))
        .route("/coupons/validate", post(handlers::coupons::validate_coupon))
        .route("/coupons/my-coupons", get(handlers::coupons::my_coupons))
        .route("/coupons/code/:code", get(handlers::coupons::get_coupon_by_code))
        .route(
            "/coupons/:id",
            get(handlers::coupons::get_coupon)
                .put(handlers::coupons::update_coupon)
                .delete(handlers::coupons::delete_coupon),
        )
        .route("/coupons/:id/assign", post(handlers::coupons::assign_coupon))
        .route("/coupons/:id/redeem", post(handlers::coupons::redeem_coupon))
        .route("/coupons/:id/settle", post(handlers::coupons::settle_coupon))
        .route("/coupons/:id/reject", post(handlers::coupons::reject_coupon))
        .route("/coupons/:id/send", post(handlers::coupons::send_coupon))
        .route(
            "/coupons/:id/add-to-wallet",
            post(handlers::coupons::add_coupon_to_wallet),
        )
        .route(
            "/coupons/:id/analytics",
            get(handlers::coupons::coupon_analytics),
        )
        // Wallet ledger surface.
        .route(
            "/wallets",
            get(handlers::wallets::list_wallets).post(handlers::wallets::create_wallet),
        )
        .route("/wallets/:vendorId", get(handlers::wallets::get_wallet))
        .route(
            "/wallets/:vendorId/transactions",
            get(handlers::wallets::get_wallet_transactions),
        )
        .route("/wallets/:vendorId/topup", post(handlers::wallets::topup_wallet))
        .route("/wallets/:vendorId/settle", post(handlers::wallets::settle_wallet))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
