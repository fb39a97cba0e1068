//! Persistence backends.
//!
//! Every record is scoped by owner id. Absence is reported as `None` (or an
//! empty list); turning absence into `Error::NotFound` is the facade's job.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::{Animal, AnimalId, OwnerId, OwnerSettings, PharmacyYearSummary, Prescription, Result};

/// Record store consumed by the herd facade and the engines
pub trait HerdStore: Send + Sync {
    fn get_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<Option<Animal>>;

    /// All animals of an owner, ordered by animal id
    fn list_animals(&self, owner_id: OwnerId) -> Result<Vec<Animal>>;

    /// Insert or overwrite
    fn save_animal(&self, animal: &Animal) -> Result<()>;

    /// Returns false when there was nothing to delete
    fn delete_animal(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<bool>;

    fn get_settings(&self, owner_id: OwnerId) -> Result<Option<OwnerSettings>>;

    fn save_settings(&self, settings: &OwnerSettings) -> Result<()>;

    fn append_prescription(&self, prescription: &Prescription) -> Result<()>;

    /// Prescriptions in insertion order
    fn list_prescriptions(&self, owner_id: OwnerId) -> Result<Vec<Prescription>>;

    fn get_year_summary(&self, owner_id: OwnerId, year: i32)
        -> Result<Option<PharmacyYearSummary>>;

    /// Stored summaries ordered by year
    fn list_year_summaries(&self, owner_id: OwnerId) -> Result<Vec<PharmacyYearSummary>>;

    /// Insert or overwrite the summary for `(summary.owner_id, summary.year)`
    fn save_year_summary(&self, summary: &PharmacyYearSummary) -> Result<()>;
}
