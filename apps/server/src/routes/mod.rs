pub mod health;
pub mod webhook;

use actix_web::web;

/// Registers every route served by the webhook ingress
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(health::liveness))
        .route("/version", web::get().to(health::version))
        .configure(webhook::configure);
}
