//! HTTP middleware components.

pub mod admin_auth;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod trace_id;

pub use admin_auth::require_admin;
pub use gate::{api_gate, AuthenticatedClient, GateRejection, API_KEY_HEADER};
pub use metrics::{init_metrics, metrics_handler, metrics_middleware};
pub use rate_limit::{RateDecision, RateLimiter};
pub use trace_id::{trace_id, RequestId, REQUEST_ID_HEADER};
