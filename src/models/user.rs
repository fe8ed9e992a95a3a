//! Learner identity and profile models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::{Validate, ValidationError};

/// Subscription level gating AI credit use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    /// School-wide license; same AI access as premium.
    Classe,
}

impl SubscriptionTier {
    /// Whether this tier may spend AI credits at all.
    pub fn has_ai_access(self) -> bool {
        matches!(self, SubscriptionTier::Premium | SubscriptionTier::Classe)
    }
}

/// Authenticated learner as reported by the auth service.
///
/// Read-only to the progress store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user ID (also the profile document ID)
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub tier: SubscriptionTier,
}

/// Profile row stored in the `profiles` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// User ID (also used as document ID)
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Older rows predate the plan column
    #[serde(default)]
    pub plan: SubscriptionTier,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Build the profile row for a learner signing in for the first time.
    pub fn provision(identity: &Identity, now: DateTime<Utc>) -> Self {
        let username = if identity.display_name.trim().is_empty() {
            identity
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string()
        } else {
            identity.display_name.clone()
        };

        Self {
            id: identity.id.clone(),
            username,
            email: identity.email.clone(),
            avatar_url: None,
            plan: identity.tier,
            updated_at: now,
        }
    }

    /// Apply a validated update, stamping `updated_at`.
    pub fn apply(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        if let Some(username) = &update.username {
            self.username = username.trim().to_string();
        }
        if let Some(email) = &update.email {
            self.email = email.trim().to_string();
        }
        if let Some(avatar_url) = &update.avatar_url {
            self.avatar_url = Some(avatar_url.clone());
        }
        self.updated_at = now;
    }
}

const MAX_USERNAME_CHARS: usize = 50;

/// Usernames are stored trimmed, so the limits apply to the trimmed value.
fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.trim().chars().count();
    if len == 0 {
        return Err(ValidationError::new("blank_username"));
    }
    if len > MAX_USERNAME_CHARS {
        return Err(ValidationError::new("username_too_long"));
    }
    Ok(())
}

/// Editable profile fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(custom(function = "validate_username"))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(url)]
    pub avatar_url: Option<String>,
}
