//! Core record types for civicloop.
//!
//! This module defines the persisted data model: the device user profile and
//! the two append-only record kinds (collection events and breakdown reports).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// The crew role of the device user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    /// Drives the collection vehicle.
    Driver,
    /// Assists with pickups.
    Helper,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver => write!(f, "Driver"),
            Self::Helper => write!(f, "Helper"),
        }
    }
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "driver" => Ok(Self::Driver),
            "helper" => Ok(Self::Helper),
            other => Err(Error::validation(
                "role",
                format!("expected Driver or Helper, got '{other}'"),
            )),
        }
    }
}

/// The single per-device user profile.
///
/// A fresh device has the default profile: no token, not set up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    /// Opaque session token; presence means authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Phone number used to log in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    /// Selected crew role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,

    /// Assigned work zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ward_id: Option<String>,

    /// Whether role and ward have been chosen.
    pub is_profile_setup: bool,
}

impl UserProfile {
    /// True iff a non-empty auth token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Outcome of a household pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    /// Waste was cleanly separated into wet and dry.
    Segregated,
    /// Waste was handed over unsorted.
    Mixed,
    /// Waste was refused (hazardous, debris, etc.).
    Rejected,
    /// Nobody home; house closed.
    Locked,
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segregated => write!(f, "segregated"),
            Self::Mixed => write!(f, "mixed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// A latitude/longitude pair. `(0, 0)` marks an unknown position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl GeoLocation {
    /// Create a location from coordinates.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// The zero-coordinate fallback used when no fix is available.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether this is the zero-coordinate fallback.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }
}

/// A record that takes part in deferred sync.
pub trait SyncRecord {
    /// Identifier unique within its collection.
    fn record_id(&self) -> &str;

    /// Whether the remote store has acknowledged this record.
    fn is_synced(&self) -> bool;

    /// Flag this record as acknowledged by the remote store.
    fn mark_synced(&mut self);
}

/// One waste-collection event at a household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    /// Client-generated unique id.
    pub collection_id: String,
    /// Driver who logged the pickup.
    pub driver_id: String,
    /// QR payload or generated placeholder.
    pub household_id: String,
    /// Pickup outcome.
    pub status: CollectionStatus,
    /// When the pickup happened.
    pub timestamp: DateTime<Utc>,
    /// Where the pickup happened.
    pub gps: GeoLocation,
    /// Whether the record reached the remote store.
    #[serde(default)]
    pub is_synced: bool,
    /// Optional photo as a data URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CollectionRecord {
    /// Create an unsynced record stamped now with a fresh id.
    #[must_use]
    pub fn new(
        driver_id: impl Into<String>,
        household_id: impl Into<String>,
        status: CollectionStatus,
        gps: GeoLocation,
    ) -> Self {
        Self {
            collection_id: Uuid::new_v4().to_string(),
            driver_id: driver_id.into(),
            household_id: household_id.into(),
            status,
            timestamp: Utc::now(),
            gps,
            is_synced: false,
            image_url: None,
        }
    }

    /// Attach a photo.
    #[must_use]
    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }
}

impl SyncRecord for CollectionRecord {
    fn record_id(&self) -> &str {
        &self.collection_id
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn mark_synced(&mut self) {
        self.is_synced = true;
    }
}

/// A vehicle breakdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRecord {
    /// Client-generated unique id.
    pub id: String,
    /// Driver who filed the report.
    pub driver_id: String,
    /// When the report was filed.
    pub timestamp: DateTime<Utc>,
    /// What happened; never empty when created through the breakdown flow.
    pub details: String,
    /// Where the vehicle is.
    pub gps: GeoLocation,
    /// Optional photo as a data URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Whether the record reached the remote store.
    #[serde(default)]
    pub is_synced: bool,
}

impl BreakdownRecord {
    /// Create an unsynced report stamped now with a fresh id.
    #[must_use]
    pub fn new(driver_id: impl Into<String>, details: impl Into<String>, gps: GeoLocation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            driver_id: driver_id.into(),
            timestamp: Utc::now(),
            details: details.into(),
            gps,
            image_url: None,
            is_synced: false,
        }
    }

    /// Attach a photo.
    #[must_use]
    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }
}

impl SyncRecord for BreakdownRecord {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn mark_synced(&mut self) {
        self.is_synced = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_and_parse() {
        assert_eq!(UserRole::Driver.to_string(), "Driver");
        assert_eq!("helper".parse::<UserRole>().unwrap(), UserRole::Helper);
        assert_eq!(" DRIVER ".parse::<UserRole>().unwrap(), UserRole::Driver);
        assert!("cleaner".parse::<UserRole>().unwrap_err().is_validation_error());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CollectionStatus::Segregated.to_string(), "segregated");
        assert_eq!(CollectionStatus::Mixed.to_string(), "mixed");
        assert_eq!(CollectionStatus::Rejected.to_string(), "rejected");
        assert_eq!(CollectionStatus::Locked.to_string(), "locked");
    }

    #[test]
    fn test_default_profile() {
        let profile = UserProfile::default();
        assert!(!profile.is_profile_setup);
        assert!(!profile.is_authenticated());
    }

    #[test]
    fn test_empty_token_is_not_authenticated() {
        let profile = UserProfile {
            auth_token: Some(String::new()),
            ..UserProfile::default()
        };
        assert!(!profile.is_authenticated());
    }

    #[test]
    fn test_profile_wire_format() {
        let profile = UserProfile {
            auth_token: Some("tok".to_string()),
            role: Some(UserRole::Driver),
            ward_id: Some("Ward 3".to_string()),
            is_profile_setup: true,
            ..UserProfile::default()
        };
        let json = serde_json::to_value(&profile).unwrap();

        assert_eq!(json["authToken"], "tok");
        assert_eq!(json["role"], "Driver");
        assert_eq!(json["wardId"], "Ward 3");
        assert_eq!(json["isProfileSetup"], true);
        assert!(json.get("phoneNumber").is_none());
    }

    #[test]
    fn test_profile_accepts_minimal_blob() {
        let profile: UserProfile = serde_json::from_str(r#"{"isProfileSetup":false}"#).unwrap();
        assert_eq!(profile, UserProfile::default());
    }

    #[test]
    fn test_collection_record_new() {
        let gps = GeoLocation::new(12.97, 77.59);
        let record = CollectionRecord::new("DRV-101", "HH-42", CollectionStatus::Mixed, gps);

        assert!(!record.is_synced());
        assert_eq!(record.household_id, "HH-42");
        assert!(Uuid::parse_str(&record.collection_id).is_ok());
        assert!(record.image_url.is_none());
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = CollectionRecord::new("d", "h", CollectionStatus::Locked, GeoLocation::unknown());
        let b = CollectionRecord::new("d", "h", CollectionStatus::Locked, GeoLocation::unknown());
        assert_ne!(a.record_id(), b.record_id());
    }

    #[test]
    fn test_collection_wire_format() {
        let record = CollectionRecord::new(
            "DRV-101",
            "HH-1",
            CollectionStatus::Segregated,
            GeoLocation::unknown(),
        );
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "segregated");
        assert_eq!(json["is_synced"], false);
        assert_eq!(json["gps"]["lat"], 0.0);
        assert!(json.get("image_url").is_none());
    }

    #[test]
    fn test_mark_synced() {
        let mut report = BreakdownRecord::new("DRV-101", "Flat tire", GeoLocation::unknown());
        assert!(!report.is_synced());
        report.mark_synced();
        assert!(report.is_synced());
    }

    #[test]
    fn test_with_image() {
        let report = BreakdownRecord::new("DRV-101", "Smoke", GeoLocation::unknown())
            .with_image(Some("data:image/jpeg;base64,AAAA".to_string()));
        assert!(report.image_url.is_some());
    }

    #[test]
    fn test_geolocation_unknown() {
        assert!(GeoLocation::unknown().is_unknown());
        assert!(!GeoLocation::new(0.0, 1.0).is_unknown());
    }
}
