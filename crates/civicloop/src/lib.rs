//! `civicloop` - Offline-first field app core for waste-collection crews
//!
//! This library keeps the device user's profile and the crew's collection and
//! breakdown records on the device, and syncs pending records to a remote
//! store in one all-or-nothing batch.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod assistant;
pub mod cli;
pub mod config;
pub mod error;
pub mod flows;
pub mod identity;
pub mod location;
pub mod logging;
pub mod model;
pub mod records;
pub mod scanner;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use identity::IdentityStore;
pub use logging::init_logging;
pub use model::{
    BreakdownRecord, CollectionRecord, CollectionStatus, GeoLocation, UserProfile, UserRole,
};
pub use records::{RecordStats, StoreEvent, WasteStore};
pub use storage::{Storage, StorageStats};
