//! Treatment quota over a rolling 365-day window.
//!
//! An animal may receive at most [`MAX_TREATMENTS_PER_WINDOW`] treatments in
//! any rolling year. Going over is allowed and reported, never refused.

use crate::dates::{within_rolling_window, ROLLING_WINDOW_DAYS};
use crate::{Animal, AnimalId, Clock, HerdStore, NewTreatment, OwnerId, Result};
use crate::herd::Herd;
use chrono::{Duration, NaiveDate};
use uuid::Uuid;

/// Treatments allowed per rolling 365-day window
pub const MAX_TREATMENTS_PER_WINDOW: i64 = 3;

/// Quota position of one animal on a given day
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: i64,
    /// Negative when the animal was over-treated
    pub remaining: i64,
    pub next_eligible: Option<NaiveDate>,
}

impl QuotaStatus {
    pub fn for_animal(animal: &Animal, today: NaiveDate) -> Self {
        let used = treatments_in_window(animal, today);
        Self {
            used,
            remaining: MAX_TREATMENTS_PER_WINDOW - used,
            next_eligible: next_eligible_date(animal, today),
        }
    }

    pub fn is_exceeded(&self) -> bool {
        self.remaining < 0
    }
}

/// Treatments dated on or after `today - 365` (boundary day included)
pub fn treatments_in_window(animal: &Animal, today: NaiveDate) -> i64 {
    animal
        .treatments
        .iter()
        .filter(|t| within_rolling_window(t.treatment_date, today))
        .count() as i64
}

pub fn remaining_quota(animal: &Animal, today: NaiveDate) -> i64 {
    MAX_TREATMENTS_PER_WINDOW - treatments_in_window(animal, today)
}

/// When the animal may be treated again without exceeding its quota
///
/// With a full window, that is a year after the treatment that rolls off
/// first. Otherwise a year after the oldest treatment on record; `None`
/// when there is no history at all.
pub fn next_eligible_date(animal: &Animal, today: NaiveDate) -> Option<NaiveDate> {
    let mut dates: Vec<NaiveDate> = animal.treatments.iter().map(|t| t.treatment_date).collect();
    if dates.is_empty() {
        return None;
    }
    dates.sort_unstable_by(|a, b| b.cmp(a));

    let in_window = treatments_in_window(animal, today);
    let anchor = if in_window >= MAX_TREATMENTS_PER_WINDOW && dates.len() as i64 >= in_window {
        dates[(in_window - 1) as usize]
    } else {
        *dates.last()?
    };
    anchor.checked_add_signed(Duration::days(ROLLING_WINDOW_DAYS))
}

impl<S: HerdStore, C: Clock> Herd<S, C> {
    /// Append a treatment and report the animal's quota afterwards
    ///
    /// This is the only path that appends treatments. Zero quantities are
    /// dropped; negative ones are rejected.
    pub fn record_treatment(
        &self,
        owner_id: OwnerId,
        animal_id: AnimalId,
        treatment: NewTreatment,
    ) -> Result<QuotaStatus> {
        let treatment = NewTreatment {
            medications: treatment.medications.into_dose()?,
            ..treatment
        }
        .into_treatment(Uuid::new_v4());
        let today = self.today();

        let status = self.modify_animal(owner_id, animal_id, false, |animal| {
            animal.treatments.push(treatment);
            Ok(QuotaStatus::for_animal(animal, today))
        })?;

        tracing::info!(
            "Added care to animal {} of owner {} ({} left in window)",
            animal_id,
            owner_id,
            status.remaining
        );
        if status.is_exceeded() {
            tracing::warn!(
                "Animal {} of owner {} is over its treatment quota by {}",
                animal_id,
                owner_id,
                -status.remaining
            );
        }
        Ok(status)
    }

    pub fn quota_status(&self, owner_id: OwnerId, animal_id: AnimalId) -> Result<QuotaStatus> {
        let animal = self.load_animal(owner_id, animal_id)?;
        Ok(QuotaStatus::for_animal(&animal, self.today()))
    }
}
