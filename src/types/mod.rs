//! Domain and wire types shared by the proxy and the session lifecycle.

pub mod auth_state;
pub mod identity;
pub mod profile;
pub mod session;

pub use auth_state::{AuthPhase, AuthSnapshot, SignUpOutcome};
pub use identity::{AuthUser, ProviderUser, SignUpResponse, TokenGrant};
pub use profile::{Handedness, NewProfile, Profile, ProfilePatch, ProfileState, UnitPreference};
pub use session::{Established, SessionRecord};
