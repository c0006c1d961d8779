use super::identity::AuthUser;
use super::profile::ProfileState;

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticating,
    AuthenticatedNoProfile,
    AuthenticatedProfileIncomplete,
    AuthenticatedComplete,
    SigningOut,
}

impl AuthPhase {
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            AuthPhase::AuthenticatedNoProfile
                | AuthPhase::AuthenticatedProfileIncomplete
                | AuthPhase::AuthenticatedComplete
        )
    }

    /// Phase of an authenticated session given what is known about its profile.
    pub fn for_profile(profile: &ProfileState) -> Self {
        match profile {
            ProfileState::Pending => AuthPhase::AuthenticatedNoProfile,
            p if p.is_complete() => AuthPhase::AuthenticatedComplete,
            _ => AuthPhase::AuthenticatedProfileIncomplete,
        }
    }
}

/// Point-in-time view published to subscribers after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub user: Option<AuthUser>,
    pub profile: ProfileState,
    pub error: Option<String>,
}

impl AuthSnapshot {
    pub fn unauthenticated() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            user: None,
            profile: ProfileState::Pending,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(AuthSnapshot),
    /// Account exists; the provider will only issue a session after email confirmation.
    ConfirmationRequired(AuthUser),
}
