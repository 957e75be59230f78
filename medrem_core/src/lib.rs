#![forbid(unsafe_code)]

//! Core domain model and business logic for the medrem medicine reminder.
//!
//! This crate provides:
//! - Domain types (medicines, dose events, achievements, contacts)
//! - Schedule generation and edit reconciliation
//! - Dose lifecycle and the missed-dose sweep
//! - Adherence statistics and the achievement engine
//! - Persistence (JSON document store, notification log, CSV report)
//! - The `MedicineTracker` context tying it all together

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod dates;
pub mod schedule;
pub mod lifecycle;
pub mod adherence;
pub mod achievements;
pub mod store;
pub mod notify;
pub mod reminder;
pub mod report;
pub mod tracker;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{AdherenceConfig, Config, DataConfig, ReminderConfig, ScheduleConfig};
pub use dates::{Clock, DoseTime, FixedClock, SystemClock};
pub use lifecycle::Transition;
pub use adherence::{DayStats, MedicineStats, Statistics};
pub use achievements::Level;
pub use store::{ExportBundle, JsonFileStore, MemoryStore, Snapshot, Store, StoreExt};
pub use notify::{JsonlNotificationLog, NotificationSink};
pub use reminder::{IntervalTask, SweepOutcome};
pub use tracker::MedicineTracker;
