//! Domain layer for the EHS integration service.
//!
//! This crate contains:
//! - Request/response DTOs with validation rules
//! - Status, tier and source enums
//! - Scope and event-type catalogues
//! - Access predicates and the delivery retry policy
//!
//! Nothing here touches I/O.

pub mod models;
pub mod services;
