//! Domain services.
//!
//! Pure business rules shared by the API and background jobs.

pub mod access;
pub mod retry;

pub use access::{has_any_scope, has_scope, is_ip_allowed};
pub use retry::{RetryDecision, RetryPolicy};
