pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod router;
pub mod scoring;
pub mod service;
pub mod types;

pub use error::{ApiError, TempoError};
pub use identity::IdentityService;
pub use service::{SessionHandle, SessionStore};
