use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Right,
    Left,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitPreference {
    #[default]
    Imperial,
    Metric,
}

/// Server-stored onboarding and preference data, keyed by user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub handicap: Option<f64>,
    #[serde(default)]
    pub home_course_id: Option<String>,
    #[serde(default)]
    pub home_course_name: Option<String>,
    #[serde(default)]
    pub handedness: Option<Handedness>,
    #[serde(default)]
    pub unit_preference: UnitPreference,
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default)]
    pub has_seen_preloader: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Stand-in used when the real row cannot be obtained; routes into onboarding.
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            user_id: user_id.into(),
            handicap: None,
            home_course_id: None,
            home_course_name: None,
            handedness: None,
            unit_preference: UnitPreference::Imperial,
            profile_completed: false,
            has_seen_preloader: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(h) = patch.handicap {
            self.handicap = Some(h);
        }
        if let Some(id) = &patch.home_course_id {
            self.home_course_id = Some(id.clone());
        }
        if let Some(name) = &patch.home_course_name {
            self.home_course_name = Some(name.clone());
        }
        if let Some(h) = patch.handedness {
            self.handedness = Some(h);
        }
        if let Some(u) = patch.unit_preference {
            self.unit_preference = u;
        }
        if let Some(done) = patch.profile_completed {
            self.profile_completed = done;
        }
        if let Some(seen) = patch.has_seen_preloader {
            self.has_seen_preloader = seen;
        }
    }
}

/// Partial update sent by the onboarding wizard and settings screens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handicap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_course_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_course_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handedness: Option<Handedness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_preference: Option<UnitPreference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_seen_preloader: Option<bool>,
}

impl ProfilePatch {
    pub fn completed(mut self) -> Self {
        self.profile_completed = Some(true);
        self
    }

    pub fn preloader_seen() -> Self {
        Self {
            has_seen_preloader: Some(true),
            ..Self::default()
        }
    }
}

/// Insert body for a brand-new profile row.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub user_id: String,
    pub handicap: Option<f64>,
    pub home_course_id: Option<String>,
    pub home_course_name: Option<String>,
    pub handedness: Option<Handedness>,
    pub unit_preference: UnitPreference,
    pub profile_completed: bool,
    pub has_seen_preloader: bool,
}

impl NewProfile {
    pub fn defaults(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            handicap: None,
            home_course_id: None,
            home_course_name: None,
            handedness: None,
            unit_preference: UnitPreference::Imperial,
            profile_completed: false,
            has_seen_preloader: false,
        }
    }

    pub fn with_patch(user_id: impl Into<String>, patch: &ProfilePatch) -> Self {
        let base = Self::defaults(user_id);
        Self {
            handicap: patch.handicap,
            home_course_id: patch.home_course_id.clone(),
            home_course_name: patch.home_course_name.clone(),
            handedness: patch.handedness,
            unit_preference: patch.unit_preference.unwrap_or(base.unit_preference),
            profile_completed: patch.profile_completed.unwrap_or(base.profile_completed),
            has_seen_preloader: patch.has_seen_preloader.unwrap_or(base.has_seen_preloader),
            ..base
        }
    }
}

/// What the app currently knows about the signed-in user's profile.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    /// Fetch/create still in flight.
    Pending,
    Loaded(Profile),
    /// The row could not be obtained in time; a stand-in keeps onboarding reachable.
    Placeholder(Profile),
    Failed(String),
}

impl ProfileState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ProfileState::Loaded(p) | ProfileState::Placeholder(p) => Some(p),
            ProfileState::Pending | ProfileState::Failed(_) => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ProfileState::Loaded(p) if p.profile_completed)
    }
}
