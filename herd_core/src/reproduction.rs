//! Reproduction cycle engine.
//!
//! Only the last record of an animal's history is ever mutated. Its calving,
//! dry-off and calving-preparation dates are derived from the insemination
//! date and the owner's lead days once an ultrasound confirms the pregnancy.

use crate::dates::shift_date;
use crate::herd::{no_reproduction, Herd};
use crate::{
    Animal, AnimalId, Clock, Error, HerdStore, OwnerId, OwnerSettings, ReproductionRecord, Result,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Fixed gestation length from insemination to expected calving
pub const GESTATION_DAYS: i64 = 280;

/// The three dates derived from a confirmed pregnancy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedDates {
    pub expected_calving: NaiveDate,
    pub dry_off: NaiveDate,
    pub calving_prep: NaiveDate,
}

impl DerivedDates {
    /// Derived dates stored on a record, if all three are present
    pub fn of(record: &ReproductionRecord) -> Option<Self> {
        Some(Self {
            expected_calving: record.expected_calving_date?,
            dry_off: record.dry_off_date?,
            calving_prep: record.calving_prep_date?,
        })
    }

    pub fn compute(settings: &OwnerSettings, insemination: NaiveDate) -> Result<Self> {
        let expected_calving = shift_date(insemination, GESTATION_DAYS)?;
        Ok(Self {
            expected_calving,
            dry_off: shift_date(expected_calving, -settings.dry_off_lead_days)?,
            calving_prep: shift_date(expected_calving, -settings.calving_prep_lead_days)?,
        })
    }
}

/// One animal touched by [`Herd::recompute_all`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecomputeChange {
    pub animal_id: AnimalId,
    pub before: Option<DerivedDates>,
    pub after: DerivedDates,
}

/// Copy of `record` with its derived dates computed from `settings`
pub fn derive_dates(
    settings: &OwnerSettings,
    record: &ReproductionRecord,
) -> Result<ReproductionRecord> {
    let dates = DerivedDates::compute(settings, record.insemination)?;
    Ok(ReproductionRecord {
        expected_calving_date: Some(dates.expected_calving),
        dry_off_date: Some(dates.dry_off),
        calving_prep_date: Some(dates.calving_prep),
        ..record.clone()
    })
}

/// In the herd with a confirmed pregnancy that has not calved
fn has_ongoing_pregnancy(animal: &Animal) -> bool {
    animal.in_herd
        && animal
            .last_reproduction()
            .map_or(false, ReproductionRecord::is_ongoing_pregnancy)
}

impl<S: HerdStore, C: Clock> Herd<S, C> {
    /// Start a new breeding cycle
    ///
    /// An inseminated animal is no longer a calf. Repeated inseminations on
    /// the same day are not detected.
    pub fn record_insemination(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        date: NaiveDate,
    ) -> Result<ReproductionRecord> {
        let record = ReproductionRecord::inseminated(date);
        self.modify_animal(owner_id, animal_id, true, |animal| {
            animal.push_reproduction(record.clone());
            Ok(())
        })?;
        tracing::info!(
            "Recorded insemination of animal {} (owner {}) on {}",
            animal_id,
            owner_id,
            date
        );
        Ok(record)
    }

    /// Record the ultrasound result of the current cycle
    ///
    /// A positive result derives the calving dates from the owner's current
    /// settings. A negative one leaves the cycle without derived dates.
    pub fn confirm_ultrasound(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        confirmed: bool,
    ) -> Result<ReproductionRecord> {
        let record = self.modify_animal(owner_id, animal_id, true, |animal| {
            let settings = self.settings_or_default(owner_id)?;
            let last = animal
                .last_reproduction_mut()
                .ok_or_else(|| no_reproduction(owner_id, animal_id))?;

            if confirmed {
                *last = derive_dates(&settings, last)?;
            } else {
                last.expected_calving_date = None;
                last.dry_off_date = None;
                last.calving_prep_date = None;
            }
            last.ultrasound_confirmed = Some(confirmed);
            Ok(last.clone())
        })?;

        if confirmed {
            tracing::info!(
                "Confirmed pregnancy of animal {} (owner {}), calving expected {:?}",
                animal_id,
                owner_id,
                record.expected_calving_date
            );
        } else {
            tracing::info!(
                "Ultrasound negative for animal {} (owner {}), cycle invalidated",
                animal_id,
                owner_id
            );
        }
        Ok(record)
    }

    fn update_last_record(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        f: impl FnOnce(&mut ReproductionRecord),
    ) -> Result<ReproductionRecord> {
        self.modify_animal(owner_id, animal_id, true, |animal| {
            let last = animal
                .last_reproduction_mut()
                .ok_or_else(|| no_reproduction(owner_id, animal_id))?;
            f(last);
            Ok(last.clone())
        })
    }

    pub fn confirm_dry_off(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
    ) -> Result<ReproductionRecord> {
        let record = self.update_last_record(owner_id, animal_id, |r| r.dry_off_done = true)?;
        tracing::info!("Confirmed dry-off of animal {} (owner {})", animal_id, owner_id);
        Ok(record)
    }

    pub fn confirm_calving_prep(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
    ) -> Result<ReproductionRecord> {
        let record =
            self.update_last_record(owner_id, animal_id, |r| r.calving_prep_done = true)?;
        tracing::info!(
            "Confirmed calving preparation of animal {} (owner {})",
            animal_id,
            owner_id
        );
        Ok(record)
    }

    /// Close the current cycle
    ///
    /// A live calf is not registered here; callers follow up with
    /// [`Herd::register_juvenile`].
    pub fn confirm_calving(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        was_abortion: bool,
    ) -> Result<ReproductionRecord> {
        let record = self.update_last_record(owner_id, animal_id, |r| {
            r.calved = true;
            r.was_abortion = was_abortion;
        })?;
        tracing::info!(
            "Confirmed calving of animal {} (owner {}), abortion: {}",
            animal_id,
            owner_id,
            was_abortion
        );
        Ok(record)
    }

    /// Re-derive the dates of every ongoing pregnancy from current settings
    ///
    /// Each animal is re-read and saved under its own short lock. A failure
    /// on one animal is logged and the others still get updated. Only
    /// animals whose dates actually moved are saved and reported.
    pub fn recompute_all(&self, owner_id: OwnerId) -> Result<Vec<RecomputeChange>> {
        let settings = self.settings_or_default(owner_id)?;
        let candidates: Vec<AnimalId> = self
            .store()
            .list_animals(owner_id)?
            .iter()
            .filter(|a| has_ongoing_pregnancy(a))
            .map(|a| a.animal_id)
            .collect();

        let mut changes = Vec::new();
        for animal_id in candidates {
            match self.recompute_one(owner_id, animal_id, &settings) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(e) => tracing::error!(
                    "Failed to recompute reproduction dates of animal {} (owner {}): {}",
                    animal_id,
                    owner_id,
                    e
                ),
            }
        }

        tracing::info!(
            "Reloaded reproduction dates for owner {}: {} animal(s) changed",
            owner_id,
            changes.len()
        );
        Ok(changes)
    }

    fn recompute_one(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        settings: &OwnerSettings,
    ) -> Result<Option<RecomputeChange>> {
        self.with_owner_lock(owner_id, || {
            let mut animal = match self.store().get_animal(owner_id, animal_id)? {
                Some(animal) if has_ongoing_pregnancy(&animal) => animal,
                // Removed, purged or calved since the scan
                _ => return Ok(None),
            };
            let Some(last) = animal.last_reproduction_mut() else {
                return Ok(None);
            };

            let before = DerivedDates::of(last);
            let after = DerivedDates::compute(settings, last.insemination)?;
            if before == Some(after) {
                return Ok(None);
            }
            *last = derive_dates(settings, last)?;
            self.store().save_animal(&animal)?;
            Ok(Some(RecomputeChange {
                animal_id,
                before,
                after,
            }))
        })
    }

    /// Current cycle of every animal with an ongoing pregnancy
    pub fn valid_reproduction_snapshot(
        &self,
        owner_id: OwnerId,
    ) -> Result<BTreeMap<AnimalId, ReproductionRecord>> {
        Ok(self
            .store()
            .list_animals(owner_id)?
            .into_iter()
            .filter(has_ongoing_pregnancy)
            .filter_map(|mut animal| {
                animal
                    .reproduction_history
                    .pop()
                    .map(|record| (animal.animal_id, record))
            })
            .collect())
    }

    /// Save new lead days and cascade them onto every ongoing pregnancy
    pub fn update_settings(
        &self,
        owner_id: OwnerId,
        dry_off_lead_days: i64,
        calving_prep_lead_days: i64,
    ) -> Result<Vec<RecomputeChange>> {
        if dry_off_lead_days < 0 || calving_prep_lead_days < 0 {
            return Err(Error::InvalidQuantity(format!(
                "lead days must not be negative (dry-off {}, calving prep {})",
                dry_off_lead_days, calving_prep_lead_days
            )));
        }

        self.with_owner_lock(owner_id, || {
            let mut settings = self.settings_or_default(owner_id)?;
            settings.dry_off_lead_days = dry_off_lead_days;
            settings.calving_prep_lead_days = calving_prep_lead_days;
            self.store().save_settings(&settings)
        })?;
        tracing::info!(
            "Updated settings of owner {}: dry-off {} days, calving prep {} days",
            owner_id,
            dry_off_lead_days,
            calving_prep_lead_days
        );

        self.recompute_all(owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;
    use crate::{FixedClock, MemoryStore, PharmacyYearSummary, Prescription};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn settings(dry: i64, prep: i64) -> OwnerSettings {
        OwnerSettings {
            dry_off_lead_days: dry,
            calving_prep_lead_days: prep,
            ..OwnerSettings::new(1)
        }
    }

    fn herd() -> Herd<MemoryStore, FixedClock> {
        Herd::new(MemoryStore::new(), FixedClock(d("2024-03-01")))
    }

    #[test]
    fn test_derive_dates() {
        let record = ReproductionRecord::inseminated(d("2024-01-01"));
        let derived = derive_dates(&settings(60, 21), &record).unwrap();

        assert_eq!(derived.expected_calving_date, Some(d("2024-10-07")));
        assert_eq!(derived.dry_off_date, Some(d("2024-08-08")));
        assert_eq!(derived.calving_prep_date, Some(d("2024-09-16")));
        assert_eq!(derived.id, record.id);
        assert_eq!(derived.ultrasound_confirmed, None);
    }

    #[test]
    fn test_zero_lead_days() {
        let dates = DerivedDates::compute(&settings(0, 0), d("2024-01-01")).unwrap();
        assert_eq!(dates.dry_off, dates.expected_calving);
        assert_eq!(dates.calving_prep, dates.expected_calving);
    }

    #[test]
    fn test_insemination_ends_calfhood() {
        let herd = herd();
        herd.register_juvenile(1, 9, None).unwrap();
        assert!(herd.animal(1, 9).unwrap().is_juvenile());

        herd.record_insemination(1, 9, d("2024-02-01")).unwrap();
        assert!(!herd.animal(1, 9).unwrap().is_juvenile());
    }

    #[test]
    fn test_ultrasound_derives_with_current_settings() {
        let herd = herd();
        herd.update_settings(1, 60, 21).unwrap();
        herd.acquire_animal(1, 4, None, true).unwrap();
        herd.record_insemination(1, 4, d("2024-01-01")).unwrap();

        let record = herd.confirm_ultrasound(1, 4, true).unwrap();
        assert_eq!(record.ultrasound_confirmed, Some(true));
        assert_eq!(record.dry_off_date, Some(d("2024-08-08")));

        let record = herd.confirm_ultrasound(1, 4, false).unwrap();
        assert_eq!(record.ultrasound_confirmed, Some(false));
        assert_eq!(record.expected_calving_date, None);
    }

    #[test]
    fn test_full_cycle() {
        let herd = herd();
        herd.acquire_animal(1, 4, None, true).unwrap();
        herd.record_insemination(1, 4, d("2024-01-01")).unwrap();
        herd.confirm_ultrasound(1, 4, true).unwrap();
        herd.confirm_dry_off(1, 4).unwrap();
        herd.confirm_calving_prep(1, 4).unwrap();
        let record = herd.confirm_calving(1, 4, false).unwrap();

        assert!(record.calved);
        assert!(!record.was_abortion);
        assert!(herd.valid_reproduction_snapshot(1).unwrap().is_empty());
    }

    #[test]
    fn test_transitions_need_history_and_presence() {
        let herd = herd();
        herd.acquire_animal(1, 4, None, true).unwrap();

        assert!(matches!(herd.confirm_dry_off(1, 4), Err(Error::NotFound(_))));
        assert!(matches!(herd.confirm_calving_prep(1, 4), Err(Error::NotFound(_))));
        assert!(matches!(herd.confirm_calving(1, 4, true), Err(Error::NotFound(_))));
        assert!(matches!(herd.confirm_ultrasound(1, 4, true), Err(Error::NotFound(_))));

        herd.record_insemination(1, 4, d("2024-01-01")).unwrap();
        herd.remove_from_herd(1, 4).unwrap();
        assert!(matches!(herd.confirm_dry_off(1, 4), Err(Error::InvalidState(_))));
        assert!(matches!(
            herd.record_insemination(1, 4, d("2024-02-01")),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            herd.record_insemination(1, 99, d("2024-02-01")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_settings_cascade_scope() {
        crate::logging::init_test();
        let herd = herd();
        herd.update_settings(1, 60, 21).unwrap();

        // 1: ongoing pregnancy, gets recomputed
        herd.acquire_animal(1, 1, None, true).unwrap();
        herd.record_insemination(1, 1, d("2024-01-01")).unwrap();
        herd.confirm_ultrasound(1, 1, true).unwrap();
        // 2: calved, untouched
        herd.acquire_animal(1, 2, None, true).unwrap();
        herd.record_insemination(1, 2, d("2023-01-01")).unwrap();
        herd.confirm_ultrasound(1, 2, true).unwrap();
        herd.confirm_calving(1, 2, false).unwrap();
        // 3: pregnant but removed, untouched
        herd.acquire_animal(1, 3, None, true).unwrap();
        herd.record_insemination(1, 3, d("2024-01-01")).unwrap();
        herd.confirm_ultrasound(1, 3, true).unwrap();
        herd.remove_from_herd(1, 3).unwrap();
        // 4: ultrasound pending, untouched
        herd.acquire_animal(1, 4, None, true).unwrap();
        herd.record_insemination(1, 4, d("2024-02-01")).unwrap();

        let untouched: Vec<Animal> = [2, 3, 4]
            .iter()
            .map(|id| herd.animal(1, *id).unwrap())
            .collect();

        let changes = herd.update_settings(1, 50, 14).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].animal_id, 1);
        assert_eq!(changes[0].before.map(|b| b.dry_off), Some(d("2024-08-08")));
        assert_eq!(changes[0].after.dry_off, d("2024-08-18"));
        assert_eq!(changes[0].after.calving_prep, d("2024-09-23"));

        for before in untouched {
            assert_eq!(herd.animal(1, before.animal_id).unwrap(), before);
        }
        assert_eq!(
            herd.last_reproduction(1, 1).unwrap().dry_off_date,
            Some(d("2024-08-18"))
        );
    }

    /// Memory store whose animal writes fail for one animal once armed
    struct FailingStore {
        inner: MemoryStore,
        broken_animal: AnimalId,
        armed: AtomicBool,
    }

    impl HerdStore for FailingStore {
        fn get_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Option<Animal>> {
            self.inner.get_animal(owner_id, animal_id)
        }

        fn list_animals(&self, owner_id: OwnerId) -> Result<Vec<Animal>> {
            self.inner.list_animals(owner_id)
        }

        fn save_animal(&self, animal: &Animal) -> Result<()> {
            if self.armed.load(Ordering::SeqCst) && animal.animal_id == self.broken_animal {
                return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.inner.save_animal(animal)
        }

        fn delete_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<bool> {
            self.inner.delete_animal(owner_id, animal_id)
        }

        fn get_settings(&self, owner_id: OwnerId) -> Result<Option<OwnerSettings>> {
            self.inner.get_settings(owner_id)
        }

        fn save_settings(&self, settings: &OwnerSettings) -> Result<()> {
            self.inner.save_settings(settings)
        }

        fn append_prescription(&self, prescription: &Prescription) -> Result<()> {
            self.inner.append_prescription(prescription)
        }

        fn list_prescriptions(&self, owner_id: OwnerId) -> Result<Vec<Prescription>> {
            self.inner.list_prescriptions(owner_id)
        }

        fn get_year_summary(
            &self,
            owner_id: OwnerId,
            year: i32,
        ) -> Result<Option<PharmacyYearSummary>> {
            self.inner.get_year_summary(owner_id, year)
        }

        fn list_year_summaries(&self, owner_id: OwnerId) -> Result<Vec<PharmacyYearSummary>> {
            self.inner.list_year_summaries(owner_id)
        }

        fn save_year_summary(&self, summary: &PharmacyYearSummary) -> Result<()> {
            self.inner.save_year_summary(summary)
        }
    }

    #[test]
    fn test_recompute_skips_failed_animal() {
        crate::logging::init_test();
        let store = FailingStore {
            inner: MemoryStore::new(),
            broken_animal: 2,
            armed: AtomicBool::new(false),
        };
        let herd = Herd::new(store, FixedClock(d("2024-03-01")));
        herd.update_settings(1, 60, 21).unwrap();
        for id in [1, 2, 3] {
            herd.acquire_animal(1, id, None, true).unwrap();
            herd.record_insemination(1, id, d("2024-01-01")).unwrap();
            herd.confirm_ultrasound(1, id, true).unwrap();
        }

        herd.store().armed.store(true, Ordering::SeqCst);
        let changes = herd.update_settings(1, 50, 14).unwrap();

        let changed: Vec<AnimalId> = changes.iter().map(|c| c.animal_id).collect();
        assert_eq!(changed, vec![1, 3]);
        for id in [1, 3] {
            assert_eq!(
                herd.last_reproduction(1, id).unwrap().dry_off_date,
                Some(d("2024-08-18"))
            );
        }
        // The failed animal keeps its previous dates
        assert_eq!(
            herd.last_reproduction(1, 2).unwrap().dry_off_date,
            Some(d("2024-08-08"))
        );
    }

    #[test]
    fn test_recompute_without_change_reports_nothing() {
        let herd = herd();
        herd.update_settings(1, 60, 21).unwrap();
        herd.acquire_animal(1, 1, None, true).unwrap();
        herd.record_insemination(1, 1, d("2024-01-01")).unwrap();
        herd.confirm_ultrasound(1, 1, true).unwrap();

        assert!(herd.recompute_all(1).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_keyed_by_animal() {
        let herd = herd();
        for id in [5, 6] {
            herd.acquire_animal(1, id, None, true).unwrap();
            herd.record_insemination(1, id, d("2024-01-01")).unwrap();
        }
        herd.confirm_ultrasound(1, 6, true).unwrap();

        let snapshot = herd.valid_reproduction_snapshot(1).unwrap();
        assert_eq!(snapshot.keys().copied().collect::<Vec<_>>(), vec![6]);
    }

    #[test]
    fn test_negative_lead_days_rejected() {
        let herd = herd();
        assert!(matches!(
            herd.update_settings(1, -1, 0),
            Err(Error::InvalidQuantity(_))
        ));
    }
}
