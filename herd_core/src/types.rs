//! Core domain types for the Herdbook system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Animals and how they entered the herd
//! - Treatments and notes
//! - Reproduction records and their lifecycle stage
//! - Owner settings, prescriptions, and yearly pharmacy summaries

use crate::Quantities;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Farm / user scoping key
pub type OwnerId = u32;

/// Ear-tag number, unique per owner
pub type AnimalId = u32;

// ============================================================================
// Animal Types
// ============================================================================

/// How an animal entered the herd.
///
/// Replaces the independent "is calf" / "initialized as adult" flags: every
/// combination the herd can actually reach is one variant here.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnimalOrigin {
    /// Registered at birth on the farm
    Juvenile,
    /// Brought in as a grown cow; never counted as calf stock
    AdultAcquired,
    /// Brought in before its breeding life started; counts as calf stock
    /// until its first insemination
    AdultBornOnFarm,
}

/// A dated free-text note about an animal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: Uuid,
    pub date: NaiveDate,
    pub information: String,
}

/// A treatment administered to one animal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Treatment {
    pub id: Uuid,
    pub treatment_date: NaiveDate,
    pub medications: Quantities,
    pub annotation: String,
}

/// Treatment data as submitted, before it gets an id
#[derive(Clone, Debug, PartialEq)]
pub struct NewTreatment {
    pub treatment_date: NaiveDate,
    pub medications: Quantities,
    pub annotation: String,
}

impl NewTreatment {
    pub fn new(treatment_date: NaiveDate, medications: Quantities, annotation: impl Into<String>) -> Self {
        Self {
            treatment_date,
            medications,
            annotation: annotation.into(),
        }
    }

    pub(crate) fn into_treatment(self, id: Uuid) -> Treatment {
        Treatment {
            id,
            treatment_date: self.treatment_date,
            medications: self.medications,
            annotation: self.annotation,
        }
    }
}

/// A cow (or calf) belonging to one owner
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Animal {
    pub owner_id: OwnerId,
    pub animal_id: AnimalId,
    pub origin: AnimalOrigin,
    pub in_herd: bool,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub treatments: Vec<Treatment>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub reproduction_history: Vec<ReproductionRecord>,
    /// Earliest insemination ever recorded. Survives record deletion so
    /// an animal never turns back into a calf.
    #[serde(default)]
    pub first_inseminated_on: Option<NaiveDate>,
}

impl Animal {
    pub fn new(
        owner_id: OwnerId,
        animal_id: AnimalId,
        origin: AnimalOrigin,
        birth_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            owner_id,
            animal_id,
            origin,
            in_herd: true,
            birth_date,
            treatments: Vec::new(),
            notes: Vec::new(),
            reproduction_history: Vec::new(),
            first_inseminated_on: None,
        }
    }

    /// Still a calf: registered at birth and never inseminated
    pub fn is_juvenile(&self) -> bool {
        self.origin == AnimalOrigin::Juvenile && self.first_insemination().is_none()
    }

    pub fn initialized_as_adult(&self) -> bool {
        self.origin == AnimalOrigin::AdultAcquired
    }

    /// Most recent reproduction record (the only one that is ever mutated)
    pub fn last_reproduction(&self) -> Option<&ReproductionRecord> {
        self.reproduction_history.last()
    }

    pub fn last_reproduction_mut(&mut self) -> Option<&mut ReproductionRecord> {
        self.reproduction_history.last_mut()
    }

    /// Earliest insemination date, whatever the insertion order
    pub fn first_insemination(&self) -> Option<NaiveDate> {
        self.reproduction_history
            .iter()
            .map(|r| r.insemination)
            .chain(self.first_inseminated_on)
            .min()
    }

    /// Push a new breeding cycle and keep the first-insemination marker
    pub fn push_reproduction(&mut self, record: ReproductionRecord) {
        self.mark_inseminated(record.insemination);
        self.reproduction_history.push(record);
    }

    pub(crate) fn mark_inseminated(&mut self, date: NaiveDate) {
        self.first_inseminated_on = Some(match self.first_inseminated_on {
            Some(known) => known.min(date),
            None => date,
        });
    }

    pub fn treatment(&self, id: Uuid) -> Option<&Treatment> {
        self.treatments.iter().find(|t| t.id == id)
    }

    /// Whether a treatment given on `date` is drawn from calf stock
    pub fn counts_as_juvenile_on(&self, date: NaiveDate) -> bool {
        match self.origin {
            AnimalOrigin::AdultAcquired => false,
            AnimalOrigin::Juvenile | AnimalOrigin::AdultBornOnFarm => match self.first_insemination() {
                Some(first) => date <= first,
                None => self.origin == AnimalOrigin::Juvenile,
            },
        }
    }
}

// ============================================================================
// Reproduction Types
// ============================================================================

/// Outcome of a calving
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalvingOutcome {
    Live,
    Abortion,
}

/// Where a reproduction record sits in its lifecycle
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReproductionStage {
    /// Inseminated, ultrasound not yet recorded
    Inseminated,
    /// Ultrasound came back negative
    Rejected,
    /// Pregnancy confirmed, waiting for dry-off
    DryOffPending,
    /// Dried off, waiting for calving preparation
    CalvingPrepPending,
    /// Calving preparation done, waiting for the calf
    AwaitingCalving,
    Calved(CalvingOutcome),
}

/// One breeding cycle of an animal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReproductionRecord {
    pub id: Uuid,
    pub insemination: NaiveDate,
    pub ultrasound_confirmed: Option<bool>,
    pub dry_off_date: Option<NaiveDate>,
    pub dry_off_done: bool,
    pub calving_prep_date: Option<NaiveDate>,
    pub calving_prep_done: bool,
    pub expected_calving_date: Option<NaiveDate>,
    pub calved: bool,
    pub was_abortion: bool,
    pub details: Option<String>,
}

impl ReproductionRecord {
    /// Fresh record right after insemination, nothing derived yet
    pub fn inseminated(insemination: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            insemination,
            ultrasound_confirmed: None,
            dry_off_date: None,
            dry_off_done: false,
            calving_prep_date: None,
            calving_prep_done: false,
            expected_calving_date: None,
            calved: false,
            was_abortion: false,
            details: None,
        }
    }

    pub fn stage(&self) -> ReproductionStage {
        if self.calved {
            return ReproductionStage::Calved(if self.was_abortion {
                CalvingOutcome::Abortion
            } else {
                CalvingOutcome::Live
            });
        }
        match self.ultrasound_confirmed {
            None => ReproductionStage::Inseminated,
            Some(false) => ReproductionStage::Rejected,
            Some(true) if !self.dry_off_done => ReproductionStage::DryOffPending,
            Some(true) if !self.calving_prep_done => ReproductionStage::CalvingPrepPending,
            Some(true) => ReproductionStage::AwaitingCalving,
        }
    }

    /// Confirmed pregnancy that has not calved yet
    pub fn is_ongoing_pregnancy(&self) -> bool {
        self.ultrasound_confirmed == Some(true) && !self.calved
    }
}

// ============================================================================
// Owner Settings
// ============================================================================

/// Per-owner configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerSettings {
    pub owner_id: OwnerId,
    /// Days before expected calving to dry the cow off
    pub dry_off_lead_days: i64,
    /// Days before expected calving to start calving preparation
    pub calving_prep_lead_days: i64,
    /// Medication name to unit of measure (e.g. "ml", "dose")
    #[serde(default)]
    pub medication_catalog: BTreeMap<String, String>,
}

impl OwnerSettings {
    /// Zero lead days and an empty catalog
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            dry_off_lead_days: 0,
            calving_prep_lead_days: 0,
            medication_catalog: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Pharmacy Types
// ============================================================================

/// A stock movement: medication coming in, or expired stock written off
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub date: NaiveDate,
    pub items: Quantities,
    pub is_expiry_writeoff: bool,
}

/// Cached per-year stock totals
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct PharmacyYearSummary {
    pub owner_id: OwnerId,
    pub year: i32,
    #[serde(default)]
    pub entered: Quantities,
    #[serde(default)]
    pub used: Quantities,
    #[serde(default)]
    pub used_on_juveniles: Quantities,
    #[serde(default)]
    pub written_off_expired: Quantities,
    #[serde(default)]
    pub total_removed: Quantities,
    #[serde(default)]
    pub remaining_stock: Quantities,
    /// Remaining stock was counted by hand, not derived
    #[serde(default)]
    pub seeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        crate::dates::parse_date(s).unwrap()
    }

    #[test]
    fn test_stage_progression() {
        let mut record = ReproductionRecord::inseminated(d("2024-01-01"));
        assert_eq!(record.stage(), ReproductionStage::Inseminated);

        record.ultrasound_confirmed = Some(true);
        assert_eq!(record.stage(), ReproductionStage::DryOffPending);

        record.dry_off_done = true;
        assert_eq!(record.stage(), ReproductionStage::CalvingPrepPending);

        record.calving_prep_done = true;
        assert_eq!(record.stage(), ReproductionStage::AwaitingCalving);

        record.calved = true;
        assert_eq!(record.stage(), ReproductionStage::Calved(CalvingOutcome::Live));

        record.was_abortion = true;
        assert_eq!(record.stage(), ReproductionStage::Calved(CalvingOutcome::Abortion));
    }

    #[test]
    fn test_rejected_stage() {
        let mut record = ReproductionRecord::inseminated(d("2024-01-01"));
        record.ultrasound_confirmed = Some(false);
        assert_eq!(record.stage(), ReproductionStage::Rejected);
        assert!(!record.is_ongoing_pregnancy());
    }

    #[test]
    fn test_juvenile_flag_follows_reproduction() {
        let mut calf = Animal::new(1, 10, AnimalOrigin::Juvenile, Some(d("2023-02-01")));
        assert!(calf.is_juvenile());
        assert!(!calf.initialized_as_adult());

        calf.reproduction_history
            .push(ReproductionRecord::inseminated(d("2024-06-01")));
        assert!(!calf.is_juvenile());
    }

    #[test]
    fn test_first_insemination_ignores_insertion_order() {
        let mut cow = Animal::new(1, 10, AnimalOrigin::AdultBornOnFarm, None);
        cow.reproduction_history
            .push(ReproductionRecord::inseminated(d("2025-03-01")));
        cow.reproduction_history
            .push(ReproductionRecord::inseminated(d("2024-06-01")));
        assert_eq!(cow.first_insemination(), Some(d("2024-06-01")));
    }

    #[test]
    fn test_calfhood_ends_for_good() {
        let mut calf = Animal::new(1, 11, AnimalOrigin::Juvenile, None);
        calf.push_reproduction(ReproductionRecord::inseminated(d("2024-06-01")));
        calf.reproduction_history.clear();

        assert!(!calf.is_juvenile());
        assert_eq!(calf.first_insemination(), Some(d("2024-06-01")));
        assert!(calf.counts_as_juvenile_on(d("2024-05-01")));
        assert!(!calf.counts_as_juvenile_on(d("2024-07-01")));
    }

    #[test]
    fn test_juvenile_attribution_by_origin() {
        let acquired = Animal::new(1, 1, AnimalOrigin::AdultAcquired, None);
        assert!(!acquired.counts_as_juvenile_on(d("2024-05-01")));

        let calf = Animal::new(1, 2, AnimalOrigin::Juvenile, None);
        assert!(calf.counts_as_juvenile_on(d("2024-05-01")));

        // No breeding history yet: an animal acquired as not-yet-adult is
        // not attributed to calf stock until it has a first insemination.
        let mut heifer = Animal::new(1, 3, AnimalOrigin::AdultBornOnFarm, None);
        assert!(!heifer.counts_as_juvenile_on(d("2024-05-01")));

        heifer
            .reproduction_history
            .push(ReproductionRecord::inseminated(d("2024-06-01")));
        assert!(heifer.counts_as_juvenile_on(d("2024-05-01")));
        assert!(heifer.counts_as_juvenile_on(d("2024-06-01")));
        assert!(!heifer.counts_as_juvenile_on(d("2024-07-01")));
    }
}
