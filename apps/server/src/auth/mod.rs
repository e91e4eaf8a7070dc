pub mod gcp;
pub mod github_app;
pub mod signature;

pub use gcp::{GcpAuthError, GcpTokenSource};
pub use github_app::{AppAuthError, AppTokenSource};
pub use signature::{compute_signature, format_signature_header, verify_signature};
