use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct LivenessResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct VersionResponse {
    version: &'static str,
}

/// Liveness check - is the process running?
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(LivenessResponse { status: "ok" })
}

/// Build version of the running server
pub async fn version() -> HttpResponse {
    HttpResponse::Ok().json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}
