//! HTTP handlers for the purchase pipeline
//!
//! - Gateway: `POST /buy`, `GET /getAllUserBuys`
//! - Ledger: `GET /api/purchases/{userId}`, `GET /api/purchases`
//! - Both: `GET /health`
pub mod health;
pub mod purchases;

use actix_web::web;

use crate::config::RunMode;

pub use health::health;
pub use purchases::{buy, get_all_user_buys, get_recent_purchases, get_user_purchases};

/// Register the routes served in `mode`
pub fn configure(mode: RunMode) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.route("/health", web::get().to(health));

        if mode.runs_gateway() {
            cfg.route("/buy", web::post().to(buy))
                .route("/getAllUserBuys", web::get().to(get_all_user_buys));
        }

        if mode.runs_ledger() {
            cfg.service(
                web::scope("/api/purchases")
                    .route("", web::get().to(get_recent_purchases))
                    .route("/{userId}", web::get().to(get_user_purchases)),
            );
        }
    }
}
