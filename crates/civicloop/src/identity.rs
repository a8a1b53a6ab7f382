//! Device identity store.
//!
//! Persists the single [`UserProfile`] and answers the entry-gating questions
//! (authenticated? set up?). Storage failures never reach the caller: reads
//! fall back to the default profile and writes are logged and dropped.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::model::{UserProfile, UserRole};
use crate::storage::Storage;

/// Storage key of the profile box.
pub const USER_BOX: &str = "civicloop_user_prefs";

/// Handle to the persisted user profile.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    storage: Arc<Storage>,
}

impl IdentityStore {
    /// Create a store over the given storage.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Current profile snapshot, or the default profile if none was written.
    #[must_use]
    pub fn user(&self) -> UserProfile {
        self.storage.read_json(USER_BOX).unwrap_or_default()
    }

    /// True iff a non-empty auth token is stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user().is_authenticated()
    }

    /// True iff role and ward setup has been completed.
    #[must_use]
    pub fn is_profile_setup(&self) -> bool {
        self.user().is_profile_setup
    }

    /// Record a successful login, keeping any existing role and ward.
    pub fn login(&self, phone_number: &str, token: &str) {
        self.merge("login", |profile| {
            profile.phone_number = Some(phone_number.to_string());
            profile.auth_token = Some(token.to_string());
        });
        debug!("Logged in as {}", masked_phone(phone_number));
    }

    /// Store role and ward and mark the profile as set up.
    pub fn complete_setup(&self, role: UserRole, ward_id: &str) {
        self.merge("complete_setup", |profile| {
            profile.role = Some(role);
            profile.ward_id = Some(ward_id.to_string());
            profile.is_profile_setup = true;
        });
        info!("Profile set up as {} in {}", role, ward_id);
    }

    /// Switch crew role without touching anything else.
    pub fn update_role(&self, role: UserRole) {
        self.merge("update_role", |profile| profile.role = Some(role));
        debug!("Role switched to {}", role);
    }

    /// Delete the profile entirely; later reads see the default profile.
    pub fn logout(&self) {
        match self.storage.remove(USER_BOX) {
            Ok(_) => info!("Logged out"),
            Err(e) => error!("Failed to remove user profile: {}", e),
        }
    }

    fn merge(&self, operation: &str, apply: impl FnOnce(&mut UserProfile)) {
        if let Err(e) = self.storage.update_json(USER_BOX, apply) {
            error!("User profile write failed during {}: {}", operation, e);
        }
    }
}

/// Phone number with all but the last four characters hidden.
fn masked_phone(phone_number: &str) -> String {
    let visible = phone_number.chars().count().saturating_sub(4);
    phone_number
        .chars()
        .enumerate()
        .map(|(i, c)| if i < visible { '*' } else { c })
        .collect()
}
