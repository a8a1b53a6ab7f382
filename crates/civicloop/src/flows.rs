//! Field-worker flows on top of the stores.
//!
//! Input validation lives here, never in the stores: a flow checks what the
//! worker entered, fills in generated fields, and then hands a finished record
//! or profile change to [`IdentityStore`] or [`WasteStore`].

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::identity::IdentityStore;
use crate::location::{best_effort_location, LocationProvider};
use crate::model::{BreakdownRecord, CollectionRecord, CollectionStatus, UserProfile, UserRole};
use crate::records::WasteStore;
use crate::scanner::ScanSession;

/// Digits required in a phone number.
const PHONE_DIGITS: usize = 10;

/// Shortest accepted name when registering.
const MIN_NAME_LEN: usize = 3;

/// Exclusive upper bound of generated household numbers.
const PLACEHOLDER_HOUSEHOLD_RANGE: u32 = 10_000;

fn non_digits() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\D").expect("valid non-digit pattern"))
}

/// The first screen a worker sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryView {
    /// No session: log in or register.
    Login,
    /// Logged in, but role and ward not chosen yet.
    Setup,
    /// Ready to work.
    Home,
}

impl std::fmt::Display for EntryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Setup => write!(f, "setup"),
            Self::Home => write!(f, "home"),
        }
    }
}

/// Decide the entry view from the stored profile.
#[must_use]
pub fn resolve_entry_view(identity: &IdentityStore) -> EntryView {
    let user = identity.user();
    if !user.is_authenticated() {
        EntryView::Login
    } else if !user.is_profile_setup {
        EntryView::Setup
    } else {
        EntryView::Home
    }
}

/// Strip everything but digits from a phone number.
#[must_use]
pub fn normalize_phone(input: &str) -> String {
    non_digits().replace_all(input, "").into_owned()
}

/// Login or registration input.
#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    /// Mobile number as typed; separators are ignored.
    pub phone: String,
    /// Full name, only checked when registering.
    pub name: Option<String>,
    /// Whether this is a new registration.
    pub register: bool,
}

impl LoginForm {
    /// Validate the form and return the normalized phone number.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the phone number does not have exactly
    /// ten digits, or if a registration name is shorter than three characters.
    pub fn validate(&self) -> Result<String> {
        let phone = normalize_phone(&self.phone);
        if phone.len() != PHONE_DIGITS {
            return Err(Error::validation(
                "phone",
                "Please enter a valid 10-digit phone number",
            ));
        }

        if self.register {
            let name = self.name.as_deref().unwrap_or_default().trim();
            if name.chars().count() < MIN_NAME_LEN {
                return Err(Error::validation("name", "Please enter your full name"));
            }
        }

        Ok(phone)
    }
}

/// Session token issued by the stand-in auth step.
#[must_use]
pub fn mock_token() -> String {
    format!("auth_token_{}", Utc::now().timestamp_millis())
}

/// Validate the form and log the worker in.
///
/// Returns the view to show next.
///
/// # Errors
///
/// Returns a validation error from [`LoginForm::validate`]; the stored profile
/// is not touched in that case.
pub fn login(identity: &IdentityStore, form: &LoginForm) -> Result<EntryView> {
    let phone = form.validate()?;
    if form.register {
        info!("Registering new worker");
    }

    identity.login(&phone, &mock_token());
    Ok(resolve_entry_view(identity))
}

/// Role and ward selection.
#[derive(Debug, Clone, Default)]
pub struct SetupForm {
    /// Chosen crew role.
    pub role: Option<UserRole>,
    /// Chosen ward; the first offered ward when absent.
    pub ward: Option<String>,
}

impl SetupForm {
    /// Validate against the offered wards.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no role was chosen, no ward is offered,
    /// or the chosen ward is not one of `wards`.
    pub fn validate(&self, wards: &[String]) -> Result<(UserRole, String)> {
        let role = self
            .role
            .ok_or_else(|| Error::validation("role", "Please select a role"))?;

        let ward = match self.ward.as_deref().map(str::trim) {
            Some(chosen) => wards
                .iter()
                .find(|w| w.as_str() == chosen)
                .ok_or_else(|| {
                    Error::validation("ward", format!("'{chosen}' is not an offered ward"))
                })?,
            None => wards
                .first()
                .ok_or_else(|| Error::validation("ward", "No wards are configured"))?,
        };

        Ok((role, ward.clone()))
    }
}

/// Validate the form and complete profile setup.
///
/// # Errors
///
/// Returns a validation error from [`SetupForm::validate`].
pub fn complete_setup(
    identity: &IdentityStore,
    form: &SetupForm,
    wards: &[String],
) -> Result<UserProfile> {
    let (role, ward) = form.validate(wards)?;
    identity.complete_setup(role, &ward);
    Ok(identity.user())
}

/// Household id used when no QR code was scanned.
#[must_use]
pub fn placeholder_household_id() -> String {
    let n = rand::rng().random_range(0..PLACEHOLDER_HOUSEHOLD_RANGE);
    format!("HH-{n}")
}

/// Shared inputs for building records on this device.
pub struct RecordContext<'a> {
    /// Driver id stamped on every record.
    pub driver_id: &'a str,
    /// Where the position fix comes from.
    pub location: &'a dyn LocationProvider,
    /// How long to wait for a fix.
    pub location_timeout: Duration,
}

impl std::fmt::Debug for RecordContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordContext")
            .field("driver_id", &self.driver_id)
            .field("location_timeout", &self.location_timeout)
            .finish_non_exhaustive()
    }
}

/// A pickup about to be recorded.
#[derive(Debug, Clone)]
pub struct CollectionDraft {
    /// Scanned QR payload, if any.
    pub household_id: Option<String>,
    /// Pickup outcome.
    pub status: CollectionStatus,
    /// Photo as a data URI.
    pub image_url: Option<String>,
}

impl CollectionDraft {
    /// Draft for `status` with no scan and no photo.
    #[must_use]
    pub fn new(status: CollectionStatus) -> Self {
        Self {
            household_id: None,
            status,
            image_url: None,
        }
    }

    /// Run raw camera reads through a fresh [`ScanSession`] and keep the
    /// payload it captured as the household id.
    #[must_use]
    pub fn with_scans<'a>(mut self, reads: impl IntoIterator<Item = &'a str>) -> Self {
        let mut session = ScanSession::new();
        for payload in reads {
            session.offer(payload);
        }
        self.household_id = session.captured().map(str::to_string);
        self
    }

    /// Build the record and save it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    pub async fn submit(
        self,
        store: &WasteStore,
        ctx: &RecordContext<'_>,
    ) -> Result<CollectionRecord> {
        let household_id = self
            .household_id
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(placeholder_household_id);
        let gps = best_effort_location(ctx.location, ctx.location_timeout).await;

        let record = CollectionRecord::new(ctx.driver_id, household_id, self.status, gps)
            .with_image(self.image_url);
        store.save_collection(record.clone())?;
        Ok(record)
    }
}

/// A vehicle breakdown about to be reported.
#[derive(Debug, Clone)]
pub struct BreakdownDraft {
    /// Free-text description.
    pub details: String,
    /// Photo as a data URI.
    pub image_url: Option<String>,
}

impl BreakdownDraft {
    /// Draft with the given description and no photo.
    #[must_use]
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
            image_url: None,
        }
    }

    /// Validate, build the report, and save it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or whitespace-only details, or an
    /// error if the report could not be persisted.
    pub async fn submit(
        self,
        store: &WasteStore,
        ctx: &RecordContext<'_>,
    ) -> Result<BreakdownRecord> {
        if self.details.trim().is_empty() {
            return Err(Error::validation("details", "Please describe the issue"));
        }

        let gps = best_effort_location(ctx.location, ctx.location_timeout).await;
        let record =
            BreakdownRecord::new(ctx.driver_id, self.details, gps).with_image(self.image_url);
        store.save_breakdown(record.clone())?;
        Ok(record)
    }
}

/// Result of asking to log out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The profile was deleted.
    LoggedOut,
    /// Unsynced records exist; nothing was changed.
    NeedsConfirmation {
        /// Records that have not reached the remote store.
        unsynced: usize,
    },
}

/// Log out, asking for confirmation first while records are still pending.
///
/// Pending records are kept either way.
pub fn logout(identity: &IdentityStore, store: &WasteStore, confirmed: bool) -> LogoutOutcome {
    let unsynced = store.unsynced_count();
    if unsynced > 0 && !confirmed {
        return LogoutOutcome::NeedsConfirmation { unsynced };
    }

    if unsynced > 0 {
        warn!("Logging out with {} unsynced records on the device", unsynced);
    }
    identity.logout();
    LogoutOutcome::LoggedOut
}
