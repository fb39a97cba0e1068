//! Owner-scoped herd operations.
//!
//! [`Herd`] wraps a [`HerdStore`] and a [`Clock`]. Every read-modify-write
//! sequence runs under the owner's lock. The quota, reproduction and pharmacy
//! engines add their operations to the same type in their own modules.

use crate::locks::OwnerLocks;
use crate::{
    Animal, AnimalId, AnimalOrigin, Clock, Error, HerdStore, NewTreatment, Note, OwnerId,
    OwnerSettings, ReproductionRecord, Result, Treatment,
};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which animals a query returns; `None` fields match everything
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnimalFilter {
    pub in_herd: Option<bool>,
    pub juvenile: Option<bool>,
    pub origin: Option<AnimalOrigin>,
}

impl AnimalFilter {
    /// Animals currently on the farm
    pub fn present() -> Self {
        Self {
            in_herd: Some(true),
            ..Self::default()
        }
    }

    /// Calves currently on the farm
    pub fn juveniles() -> Self {
        Self {
            in_herd: Some(true),
            juvenile: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, animal: &Animal) -> bool {
        self.in_herd.map_or(true, |v| animal.in_herd == v)
            && self.juvenile.map_or(true, |v| animal.is_juvenile() == v)
            && self.origin.map_or(true, |v| animal.origin == v)
    }
}

/// A treatment together with the animal it was given to
#[derive(Clone, Debug, PartialEq)]
pub struct SignedTreatment {
    pub animal_id: AnimalId,
    pub treatment: Treatment,
}

/// Facade over the record store for one or more owners
pub struct Herd<S, C> {
    store: S,
    clock: C,
    locks: OwnerLocks,
}

impl<S: HerdStore, C: Clock> Herd<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            locks: OwnerLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Run `f` under the owner's lock
    pub(crate) fn with_owner_lock<T>(
        &self,
        owner_id: OwnerId,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.locks.with_lock(owner_id, f)
    }

    pub(crate) fn load_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Animal> {
        self.store
            .get_animal(owner_id, animal_id)?
            .ok_or_else(|| Error::animal_not_found(owner_id, animal_id))
    }

    /// Load, mutate and save one animal under the owner's lock
    ///
    /// With `require_in_herd`, a removed animal fails with `InvalidState`
    /// before `f` runs. Nothing is saved when `f` fails.
    pub(crate) fn modify_animal<T>(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        require_in_herd: bool,
        f: impl FnOnce(&mut Animal) -> Result<T>,
    ) -> Result<T> {
        self.with_owner_lock(owner_id, || {
            let mut animal = self.load_animal(owner_id, animal_id)?;
            if require_in_herd && !animal.in_herd {
                return Err(Error::animal_removed(owner_id, animal_id));
            }
            let out = f(&mut animal)?;
            self.store.save_animal(&animal)?;
            Ok(out)
        })
    }

    pub(crate) fn settings_or_default(&self, owner_id: OwnerId) -> Result<OwnerSettings> {
        Ok(self
            .store
            .get_settings(owner_id)?
            .unwrap_or_else(|| OwnerSettings::new(owner_id)))
    }

    // ------------------------------------------------------------------
    // Owners and settings
    // ------------------------------------------------------------------

    /// Create an owner's settings with zero lead days and an empty catalog
    pub fn register_owner(&self, owner_id: OwnerId) -> Result<OwnerSettings> {
        self.with_owner_lock(owner_id, || {
            if self.store.get_settings(owner_id)?.is_some() {
                return Err(Error::AlreadyExists(format!("owner {}", owner_id)));
            }
            let settings = OwnerSettings::new(owner_id);
            self.store.save_settings(&settings)?;
            tracing::info!("Registered owner {}", owner_id);
            Ok(settings)
        })
    }

    /// Stored settings, or zero defaults for an owner that never saved any
    pub fn settings(&self, owner_id: OwnerId) -> Result<OwnerSettings> {
        self.settings_or_default(owner_id)
    }

    /// Add a medication to the catalog; an existing entry keeps its unit
    pub fn add_medication(&self, owner_id: OwnerId, name: &str, unit: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidQuantity("medication name is empty".into()));
        }
        self.with_owner_lock(owner_id, || {
            let mut settings = self.settings_or_default(owner_id)?;
            if settings.medication_catalog.contains_key(name) {
                return Ok(false);
            }
            settings
                .medication_catalog
                .insert(name.to_string(), unit.trim().to_string());
            self.store.save_settings(&settings)?;
            tracing::info!("Added medication {} ({}) for owner {}", name, unit, owner_id);
            Ok(true)
        })
    }

    pub fn medication_catalog(&self, owner_id: OwnerId) -> Result<BTreeMap<String, String>> {
        Ok(self.settings_or_default(owner_id)?.medication_catalog)
    }

    // ------------------------------------------------------------------
    // Animal lifecycle
    // ------------------------------------------------------------------

    fn create_animal(&self, animal: Animal) -> Result<Animal> {
        let (owner_id, animal_id) = (animal.owner_id, animal.animal_id);
        self.with_owner_lock(owner_id, || {
            if self.store.get_animal(owner_id, animal_id)?.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "owner {}, animal {}",
                    owner_id, animal_id
                )));
            }
            self.store.save_animal(&animal)?;
            tracing::info!(
                "Created animal {} for owner {} ({:?})",
                animal_id,
                owner_id,
                animal.origin
            );
            Ok(animal)
        })
    }

    /// Bring in an animal that was not born on the farm
    ///
    /// `initialized_as_adult` marks a grown cow whose treatments never count
    /// as calf stock.
    pub fn acquire_animal(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        birth_date: Option<NaiveDate>,
        initialized_as_adult: bool,
    ) -> Result<Animal> {
        let origin = if initialized_as_adult {
            AnimalOrigin::AdultAcquired
        } else {
            AnimalOrigin::AdultBornOnFarm
        };
        self.create_animal(Animal::new(owner_id, animal_id, origin, birth_date))
    }

    /// Register a calf born on the farm
    pub fn register_juvenile(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        birth_date: Option<NaiveDate>,
    ) -> Result<Animal> {
        self.create_animal(Animal::new(
            owner_id,
            animal_id,
            AnimalOrigin::Juvenile,
            birth_date,
        ))
    }

    pub fn animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Animal> {
        self.load_animal(owner_id, animal_id)
    }

    /// Every animal of the owner, present or not
    pub fn animals(&self, owner_id: OwnerId) -> Result<Vec<Animal>> {
        self.store.list_animals(owner_id)
    }

    pub fn query_animals(&self, owner_id: OwnerId, filter: AnimalFilter) -> Result<Vec<Animal>> {
        Ok(self
            .store
            .list_animals(owner_id)?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect())
    }

    /// Soft removal: the animal and its history stay on record
    pub fn remove_from_herd(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<()> {
        self.modify_animal(owner_id, animal_id, true, |animal| {
            animal.in_herd = false;
            Ok(())
        })?;
        tracing::info!("Removed animal {} from herd of owner {}", animal_id, owner_id);
        Ok(())
    }

    /// Undo a soft removal
    pub fn return_to_herd(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<()> {
        self.modify_animal(owner_id, animal_id, false, |animal| {
            if animal.in_herd {
                return Err(Error::InvalidState(format!(
                    "owner {}, animal {} is already in the herd",
                    owner_id, animal_id
                )));
            }
            animal.in_herd = true;
            Ok(())
        })?;
        tracing::info!("Returned animal {} to herd of owner {}", animal_id, owner_id);
        Ok(())
    }

    /// Hard removal: the animal and all its history are gone
    pub fn purge_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<()> {
        self.with_owner_lock(owner_id, || {
            if !self.store.delete_animal(owner_id, animal_id)? {
                return Err(Error::animal_not_found(owner_id, animal_id));
            }
            tracing::info!("Purged animal {} of owner {}", animal_id, owner_id);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    pub fn add_note(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        date: NaiveDate,
        information: &str,
    ) -> Result<Note> {
        let note = Note {
            id: Uuid::new_v4(),
            date,
            information: information.to_string(),
        };
        self.modify_animal(owner_id, animal_id, false, |animal| {
            animal.notes.push(note.clone());
            Ok(())
        })?;
        tracing::debug!("Added note {} to animal {}", note.id, animal_id);
        Ok(note)
    }

    pub fn delete_note(&self, owner_id: OwnerId, animal_id: AnimalId, note_id: Uuid) -> Result<()> {
        self.modify_animal(owner_id, animal_id, false, |animal| {
            let before = animal.notes.len();
            animal.notes.retain(|n| n.id != note_id);
            if animal.notes.len() == before {
                return Err(Error::NotFound(format!("note {}", note_id)));
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Treatments (appending goes through `record_treatment` in quota.rs)
    // ------------------------------------------------------------------

    /// Overwrite a treatment's contents, keeping its id
    pub fn update_treatment(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        treatment_id: Uuid,
        treatment: NewTreatment,
    ) -> Result<Treatment> {
        let medications = treatment.medications.clone().into_dose()?;
        self.modify_animal(owner_id, animal_id, false, |animal| {
            let slot = animal
                .treatments
                .iter_mut()
                .find(|t| t.id == treatment_id)
                .ok_or_else(|| Error::NotFound(format!("treatment {}", treatment_id)))?;
            *slot = NewTreatment {
                medications,
                ..treatment
            }
            .into_treatment(treatment_id);
            Ok(slot.clone())
        })
    }

    pub fn delete_treatment(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        treatment_id: Uuid,
    ) -> Result<()> {
        self.modify_animal(owner_id, animal_id, false, |animal| {
            let before = animal.treatments.len();
            animal.treatments.retain(|t| t.id != treatment_id);
            if animal.treatments.len() == before {
                return Err(Error::NotFound(format!("treatment {}", treatment_id)));
            }
            Ok(())
        })?;
        tracing::info!("Deleted treatment {} of animal {}", treatment_id, animal_id);
        Ok(())
    }

    /// Treatments of one animal in insertion order
    pub fn treatments(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Vec<Treatment>> {
        Ok(self.load_animal(owner_id, animal_id)?.treatments)
    }

    /// Every treatment with at least one medication, most recent first
    pub fn all_treatments(&self, owner_id: OwnerId) -> Result<Vec<SignedTreatment>> {
        let mut signed: Vec<SignedTreatment> = self
            .store
            .list_animals(owner_id)?
            .into_iter()
            .flat_map(|animal| {
                let animal_id = animal.animal_id;
                animal
                    .treatments
                    .into_iter()
                    .filter(|t| !t.medications.is_empty())
                    .map(move |treatment| SignedTreatment {
                        animal_id,
                        treatment,
                    })
            })
            .collect();
        signed.sort_by(|a, b| b.treatment.treatment_date.cmp(&a.treatment.treatment_date));
        Ok(signed)
    }

    pub fn treatments_in_year(&self, owner_id: OwnerId, year: i32) -> Result<Vec<SignedTreatment>> {
        Ok(self
            .all_treatments(owner_id)?
            .into_iter()
            .filter(|s| s.treatment.treatment_date.year() == year)
            .collect())
    }

    // ------------------------------------------------------------------
    // Reproduction records addressed by id
    // ------------------------------------------------------------------

    /// Overwrite a reproduction record, keeping its id
    pub fn replace_reproduction_record(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        record_id: Uuid,
        record: ReproductionRecord,
    ) -> Result<()> {
        let insemination = record.insemination;
        self.modify_animal(owner_id, animal_id, true, |animal| {
            let slot = animal
                .reproduction_history
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| Error::NotFound(format!("reproduction record {}", record_id)))?;
            *slot = ReproductionRecord {
                id: record_id,
                ..record
            };
            animal.mark_inseminated(insemination);
            Ok(())
        })?;
        tracing::info!("Updated reproduction record {} of animal {}", record_id, animal_id);
        Ok(())
    }

    pub fn delete_reproduction_record(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        record_id: Uuid,
    ) -> Result<()> {
        self.modify_animal(owner_id, animal_id, true, |animal| {
            let before = animal.reproduction_history.len();
            animal.reproduction_history.retain(|r| r.id != record_id);
            if animal.reproduction_history.len() == before {
                return Err(Error::NotFound(format!("reproduction record {}", record_id)));
            }
            Ok(())
        })?;
        tracing::info!("Deleted reproduction record {} of animal {}", record_id, animal_id);
        Ok(())
    }

    /// Current breeding cycle of an animal in the herd
    pub fn last_reproduction(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
    ) -> Result<ReproductionRecord> {
        let animal = self.load_animal(owner_id, animal_id)?;
        if !animal.in_herd {
            return Err(Error::animal_removed(owner_id, animal_id));
        }
        animal
            .last_reproduction()
            .cloned()
            .ok_or_else(|| no_reproduction(owner_id, animal_id))
    }

    /// Set the free-text details of the current breeding cycle
    pub fn annotate_reproduction(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        details: &str,
    ) -> Result<()> {
        self.modify_animal(owner_id, animal_id, true, |animal| {
            let record = animal
                .last_reproduction_mut()
                .ok_or_else(|| no_reproduction(owner_id, animal_id))?;
            record.details = Some(details.to_string());
            Ok(())
        })
    }
}

pub(crate) fn no_reproduction(owner_id: OwnerId, animal_id: AnimalId) -> Error {
    Error::NotFound(format!(
        "owner {}, animal {} has no reproduction history",
        owner_id, animal_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dates::parse_date, FixedClock, MemoryStore, Quantities};

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn herd() -> Herd<MemoryStore, FixedClock> {
        Herd::new(MemoryStore::new(), FixedClock(d("2024-06-15")))
    }

    fn dose(entries: &[(&str, i64)]) -> Quantities {
        Quantities::from_entries(entries.iter().map(|(k, v)| (*k, *v))).unwrap()
    }

    #[test]
    fn test_duplicate_animal_rejected() {
        let herd = herd();
        herd.acquire_animal(1, 10, None, true).unwrap();
        assert!(matches!(
            herd.register_juvenile(1, 10, None),
            Err(Error::AlreadyExists(_))
        ));
        // Same tag under another owner is fine
        herd.register_juvenile(2, 10, None).unwrap();
    }

    #[test]
    fn test_acquire_sets_origin() {
        let herd = herd();
        let adult = herd.acquire_animal(1, 1, None, true).unwrap();
        let heifer = herd.acquire_animal(1, 2, None, false).unwrap();
        let calf = herd.register_juvenile(1, 3, Some(d("2024-05-01"))).unwrap();

        assert_eq!(adult.origin, AnimalOrigin::AdultAcquired);
        assert_eq!(heifer.origin, AnimalOrigin::AdultBornOnFarm);
        assert!(calf.is_juvenile());
        assert!(calf.in_herd);
    }

    #[test]
    fn test_soft_and_hard_removal() {
        let herd = herd();
        herd.acquire_animal(1, 5, None, true).unwrap();

        herd.remove_from_herd(1, 5).unwrap();
        assert!(!herd.animal(1, 5).unwrap().in_herd);
        assert!(matches!(
            herd.remove_from_herd(1, 5),
            Err(Error::InvalidState(_))
        ));

        herd.return_to_herd(1, 5).unwrap();
        assert!(herd.animal(1, 5).unwrap().in_herd);
        assert!(matches!(herd.return_to_herd(1, 5), Err(Error::InvalidState(_))));

        herd.purge_animal(1, 5).unwrap();
        assert!(matches!(herd.animal(1, 5), Err(Error::NotFound(_))));
        assert!(matches!(herd.purge_animal(1, 5), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_query_filters() {
        let herd = herd();
        herd.acquire_animal(1, 1, None, true).unwrap();
        herd.register_juvenile(1, 2, None).unwrap();
        herd.register_juvenile(1, 3, None).unwrap();
        herd.remove_from_herd(1, 3).unwrap();

        let calves = herd.query_animals(1, AnimalFilter::juveniles()).unwrap();
        assert_eq!(calves.len(), 1);
        assert_eq!(calves[0].animal_id, 2);

        let present = herd.query_animals(1, AnimalFilter::present()).unwrap();
        assert_eq!(present.len(), 2);

        let acquired = herd
            .query_animals(
                1,
                AnimalFilter {
                    origin: Some(AnimalOrigin::AdultAcquired),
                    ..AnimalFilter::default()
                },
            )
            .unwrap();
        assert_eq!(acquired.len(), 1);
        assert_eq!(herd.animals(1).unwrap().len(), 3);
    }

    #[test]
    fn test_treatments_addressed_by_id() {
        let herd = herd();
        herd.acquire_animal(1, 7, None, true).unwrap();
        let first = herd
            .record_treatment(1, 7, NewTreatment::new(d("2024-01-10"), dose(&[("a", 1)]), ""))
            .unwrap();
        herd.record_treatment(1, 7, NewTreatment::new(d("2024-02-10"), dose(&[("b", 2)]), ""))
            .unwrap();
        let first_id = herd.treatments(1, 7).unwrap()[0].id;
        assert_eq!(first.remaining, 2);

        let updated = herd
            .update_treatment(
                1,
                7,
                first_id,
                NewTreatment::new(d("2024-01-11"), dose(&[("a", 3), ("c", 0)]), "fixed"),
            )
            .unwrap();
        assert_eq!(updated.id, first_id);
        assert_eq!(updated.medications.len(), 1);
        assert_eq!(updated.annotation, "fixed");

        herd.delete_treatment(1, 7, first_id).unwrap();
        assert!(herd.animal(1, 7).unwrap().treatment(first_id).is_none());
        let left = herd.treatments(1, 7).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].medications.get("b"), 2);

        assert!(matches!(
            herd.delete_treatment(1, 7, first_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_all_treatments_sorted_and_signed() {
        let herd = herd();
        herd.acquire_animal(1, 1, None, true).unwrap();
        herd.acquire_animal(1, 2, None, true).unwrap();
        herd.record_treatment(1, 1, NewTreatment::new(d("2023-12-30"), dose(&[("a", 1)]), ""))
            .unwrap();
        herd.record_treatment(1, 2, NewTreatment::new(d("2024-03-01"), dose(&[("a", 1)]), ""))
            .unwrap();
        // Annotation-only visit, no medication
        herd.record_treatment(1, 2, NewTreatment::new(d("2024-04-01"), Quantities::new(), "check"))
            .unwrap();

        let all = herd.all_treatments(1).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].animal_id, 2);
        assert_eq!(all[1].animal_id, 1);

        let this_year = herd.treatments_in_year(1, 2024).unwrap();
        assert_eq!(this_year.len(), 1);
    }

    #[test]
    fn test_notes() {
        let herd = herd();
        herd.register_juvenile(1, 4, None).unwrap();
        let note = herd.add_note(1, 4, d("2024-06-01"), "limping").unwrap();
        assert_eq!(herd.animal(1, 4).unwrap().notes.len(), 1);

        herd.delete_note(1, 4, note.id).unwrap();
        assert!(herd.animal(1, 4).unwrap().notes.is_empty());
        assert!(matches!(
            herd.delete_note(1, 4, note.id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_owner_registration_and_catalog() {
        let herd = herd();
        let settings = herd.register_owner(1).unwrap();
        assert_eq!(settings.dry_off_lead_days, 0);
        assert!(matches!(herd.register_owner(1), Err(Error::AlreadyExists(_))));

        assert!(herd.add_medication(1, "penicillin", "ml").unwrap());
        assert!(!herd.add_medication(1, "penicillin", "dose").unwrap());
        assert_eq!(
            herd.medication_catalog(1).unwrap().get("penicillin").map(String::as_str),
            Some("ml")
        );

        // Unregistered owners read zero defaults
        assert_eq!(herd.settings(99).unwrap(), OwnerSettings::new(99));
    }

    #[test]
    fn test_reproduction_record_by_id() {
        let herd = herd();
        herd.acquire_animal(1, 8, None, true).unwrap();
        assert!(matches!(herd.last_reproduction(1, 8), Err(Error::NotFound(_))));

        herd.record_insemination(1, 8, d("2024-01-01")).unwrap();
        let record = herd.last_reproduction(1, 8).unwrap();

        let mut edited = ReproductionRecord::inseminated(d("2024-01-03"));
        edited.details = Some("second straw".into());
        herd.replace_reproduction_record(1, 8, record.id, edited).unwrap();

        let stored = herd.last_reproduction(1, 8).unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.insemination, d("2024-01-03"));

        herd.annotate_reproduction(1, 8, "vet visit").unwrap();
        assert_eq!(
            herd.last_reproduction(1, 8).unwrap().details.as_deref(),
            Some("vet visit")
        );

        herd.delete_reproduction_record(1, 8, record.id).unwrap();
        assert!(matches!(herd.last_reproduction(1, 8), Err(Error::NotFound(_))));

        herd.remove_from_herd(1, 8).unwrap();
        assert!(matches!(
            herd.last_reproduction(1, 8),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_deleting_breeding_record_keeps_calf_usage() {
        let herd = herd();
        herd.register_juvenile(1, 4, None).unwrap();
        herd.record_insemination(1, 4, d("2024-02-01")).unwrap();
        herd.record_treatment(
            1,
            4,
            NewTreatment::new(d("2024-03-01"), dose(&[("penicillin", 9)]), ""),
        )
        .unwrap();
        assert!(herd.used_on_juveniles(1, 2024).unwrap().is_empty());

        let record = herd.last_reproduction(1, 4).unwrap();
        herd.delete_reproduction_record(1, 4, record.id).unwrap();

        assert!(!herd.animal(1, 4).unwrap().is_juvenile());
        assert!(herd.used_on_juveniles(1, 2024).unwrap().is_empty());
        assert_eq!(herd.used(1, 2024).unwrap().get("penicillin"), 9);
    }
}
