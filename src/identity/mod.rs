//! Client for the hosted identity/database service.
//!
//! - `endpoints.rs`: stateless HTTP calls (auth + profiles REST)
//! - `service.rs`: retrying, typed facade used by the proxy and the lifecycle
//! - `jwt.rs`: unverified access-token claims

mod endpoints;
pub mod jwt;
pub mod service;

pub use service::IdentityService;
