#![forbid(unsafe_code)]

//! Core domain model and business logic for the Herdbook system.
//!
//! This crate provides:
//! - Domain types (animals, treatments, reproduction records, prescriptions)
//! - Date utilities and an injectable clock
//! - Treatment quota engine (rolling 365-day window)
//! - Reproduction cycle engine (derived dates, recompute cascade)
//! - Pharmacy stock ledger (yearly carry-forward)
//! - Persistence (in-memory and file-backed stores)

pub mod types;
pub mod error;
pub mod dates;
pub mod clock;
pub mod quantities;
pub mod config;
pub mod logging;
pub mod store;
pub mod locks;
pub mod herd;
pub mod quota;
pub mod reproduction;
pub mod pharmacy;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use clock::{Clock, FixedClock, SystemClock};
pub use quantities::Quantities;
pub use config::Config;
pub use store::{FileStore, HerdStore, MemoryStore};
pub use herd::{AnimalFilter, Herd, SignedTreatment};
pub use quota::{QuotaStatus, MAX_TREATMENTS_PER_WINDOW};
pub use reproduction::{derive_dates, DerivedDates, RecomputeChange, GESTATION_DAYS};
pub use pharmacy::{HistoryEntry, HistoryEvent};
