pub mod deep_link;
pub mod oauth_poll;
pub mod profile_sync;
pub mod session_actor;
pub mod session_store;

pub use session_actor::{SessionHandle, spawn};
pub use session_store::SessionStore;
