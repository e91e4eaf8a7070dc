use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::signature::SIGNATURE_HEADER;
use crate::error::AppResult;
use crate::ingest::{read_limited, IngestOutcome, InboundDelivery, WebhookService, MAX_PAYLOAD_BYTES};

pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Response for an accepted delivery
#[derive(serde::Serialize)]
pub struct WebhookResponse {
    pub delivery_id: String,
}

/// POST /webhook
/// GitHub webhook receiver
pub async fn receive_webhook(
    service: web::Data<WebhookService>,
    req: HttpRequest,
    payload: web::Payload,
) -> AppResult<HttpResponse> {
    let body = read_limited(payload, MAX_PAYLOAD_BYTES).await?;

    let delivery = InboundDelivery {
        delivery_id: header_value(&req, DELIVERY_HEADER),
        event: header_value(&req, EVENT_HEADER),
        signature: header_value(&req, SIGNATURE_HEADER),
        body,
    };
    let delivery_id = delivery.delivery_id.clone().unwrap_or_default();

    let status = match service.handle(delivery).await? {
        IngestOutcome::Published | IngestOutcome::DeadLettered => StatusCode::CREATED,
        IngestOutcome::AlreadyReported => StatusCode::ALREADY_REPORTED,
    };

    Ok(HttpResponse::build(status).json(WebhookResponse { delivery_id }))
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Configures the webhook routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhook", web::post().to(receive_webhook));
}
