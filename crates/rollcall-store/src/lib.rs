//! rollcall-store: Persistence for the gallery and the attendance ledger.
//!
//! Everything is plain files under one data directory: the gallery blob,
//! one JSON record per day, and the enrollment sample folders.

pub mod config;
mod fsio;
pub mod gallery_store;
pub mod ledger;
pub mod record;
pub mod samples;

pub use config::{Config, ConfigError};
pub use gallery_store::{GalleryStore, StoreError};
pub use ledger::{AttendanceLedger, LedgerError, RetryPolicy};
pub use record::{AttendanceRecord, Entry, Status};
