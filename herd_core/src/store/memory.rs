//! In-process store for tests and embedding.

use super::HerdStore;
use crate::{Animal, AnimalId, OwnerId, OwnerSettings, PharmacyYearSummary, Prescription, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    animals: BTreeMap<(OwnerId, AnimalId), Animal>,
    settings: HashMap<OwnerId, OwnerSettings>,
    prescriptions: Vec<Prescription>,
    summaries: BTreeMap<(OwnerId, i32), PharmacyYearSummary>,
}

/// Keeps every record in memory behind one mutex
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HerdStore for MemoryStore {
    fn get_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Option<Animal>> {
        Ok(self.tables().animals.get(&(owner_id, animal_id)).cloned())
    }

    fn list_animals(&self, owner_id: OwnerId) -> Result<Vec<Animal>> {
        Ok(self
            .tables()
            .animals
            .range((owner_id, AnimalId::MIN)..=(owner_id, AnimalId::MAX))
            .map(|(_, animal)| animal.clone())
            .collect())
    }

    fn save_animal(&self, animal: &Animal) -> Result<()> {
        self.tables()
            .animals
            .insert((animal.owner_id, animal.animal_id), animal.clone());
        Ok(())
    }

    fn delete_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<bool> {
        Ok(self.tables().animals.remove(&(owner_id, animal_id)).is_some())
    }

    fn get_settings(&self, owner_id: OwnerId) -> Result<Option<OwnerSettings>> {
        Ok(self.tables().settings.get(&owner_id).cloned())
    }

    fn save_settings(&self, settings: &OwnerSettings) -> Result<()> {
        self.tables()
            .settings
            .insert(settings.owner_id, settings.clone());
        Ok(())
    }

    fn append_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.tables().prescriptions.push(prescription.clone());
        Ok(())
    }

    fn list_prescriptions(&self, owner_id: OwnerId) -> Result<Vec<Prescription>> {
        Ok(self
            .tables()
            .prescriptions
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn get_year_summary(
        &self,
        owner_id: OwnerId,
        year: i32,
    ) -> Result<Option<PharmacyYearSummary>> {
        Ok(self.tables().summaries.get(&(owner_id, year)).cloned())
    }

    fn list_year_summaries(&self, owner_id: OwnerId) -> Result<Vec<PharmacyYearSummary>> {
        Ok(self
            .tables()
            .summaries
            .range((owner_id, i32::MIN)..=(owner_id, i32::MAX))
            .map(|(_, summary)| summary.clone())
            .collect())
    }

    fn save_year_summary(&self, summary: &PharmacyYearSummary) -> Result<()> {
        self.tables()
            .summaries
            .insert((summary.owner_id, summary.year), summary.clone());
        Ok(())
    }
}
