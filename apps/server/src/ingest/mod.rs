pub mod body;
pub mod service;

pub use body::{read_limited, MAX_PAYLOAD_BYTES};
pub use service::{IngestOutcome, IngestSettings, InboundDelivery, WebhookService};
