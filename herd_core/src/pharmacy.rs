//! Pharmacy stock ledger.
//!
//! Yearly flows are always recomputed from the source records (treatments
//! and prescriptions); stored summaries are a cache. The one exception is a
//! seeded year, whose remaining stock was counted by hand and anchors the
//! carry-forward of every later year.

use crate::herd::Herd;
use crate::{
    Animal, AnimalId, Clock, Error, HerdStore, OwnerId, PharmacyYearSummary, Prescription,
    Quantities, Result,
};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What produced a stock movement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryEvent {
    /// Treatment given to an animal
    Care(AnimalId),
    Prescription,
    /// Expired stock written off
    ExpiryWriteOff,
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryEvent::Care(animal_id) => write!(f, "care {}", animal_id),
            HistoryEvent::Prescription => f.write_str("prescription"),
            HistoryEvent::ExpiryWriteOff => f.write_str("dlc left"),
        }
    }
}

/// One line of the pharmacy history
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub medications: Quantities,
    pub event: HistoryEvent,
}

/// Stock movements of one calendar year
#[derive(Clone, Debug, Default, PartialEq)]
struct YearFlows {
    entered: Quantities,
    used: Quantities,
    used_on_juveniles: Quantities,
    written_off_expired: Quantities,
}

impl YearFlows {
    fn total_removed(&self) -> Quantities {
        &self.used + &self.written_off_expired
    }
}

/// Flows of every year that has data, built in one pass over the sources
#[derive(Debug, Default)]
struct Ledger {
    by_year: BTreeMap<i32, YearFlows>,
}

impl Ledger {
    fn build(animals: &[Animal], prescriptions: &[Prescription]) -> Self {
        let mut by_year: BTreeMap<i32, YearFlows> = BTreeMap::new();

        for animal in animals {
            for treatment in &animal.treatments {
                let flows = by_year.entry(treatment.treatment_date.year()).or_default();
                flows.used += &treatment.medications;
                if animal.counts_as_juvenile_on(treatment.treatment_date) {
                    flows.used_on_juveniles += &treatment.medications;
                }
            }
        }

        for prescription in prescriptions {
            let flows = by_year.entry(prescription.date.year()).or_default();
            if prescription.is_expiry_writeoff {
                flows.written_off_expired += &prescription.items;
            } else {
                flows.entered += &prescription.items;
            }
        }

        Self { by_year }
    }

    fn flows(&self, year: i32) -> YearFlows {
        self.by_year.get(&year).cloned().unwrap_or_default()
    }

    fn earliest_year(&self) -> Option<i32> {
        self.by_year.keys().next().copied()
    }

    fn latest_year(&self) -> Option<i32> {
        self.by_year.keys().next_back().copied()
    }

    /// Carry stock forward year by year up to `year`
    ///
    /// Starts from the latest seeded year before `year`, or from the first
    /// year with data on an empty stock. Years past the last one with data
    /// change nothing, so the walk stops there.
    fn remaining_stock(&self, seeds: &BTreeMap<i32, Quantities>, year: i32) -> Quantities {
        if let Some(seeded) = seeds.get(&year) {
            return seeded.clone();
        }

        let (mut carry, start) = match seeds.range(..year).next_back() {
            Some((seed_year, stock)) => (stock.clone(), seed_year + 1),
            None => match self.earliest_year() {
                Some(first) if first < year => (Quantities::new(), first),
                _ => (Quantities::new(), year),
            },
        };

        let end = self.latest_year().map_or(year, |last| last.min(year));
        for y in start..=end {
            let flows = self.flows(y);
            carry += &flows.entered;
            carry -= &flows.total_removed();
        }
        carry
    }
}

impl<S: HerdStore, C: Clock> Herd<S, C> {
    fn ledger(&self, owner_id: OwnerId) -> Result<Ledger> {
        let animals = self.store().list_animals(owner_id)?;
        let prescriptions = self.store().list_prescriptions(owner_id)?;
        Ok(Ledger::build(&animals, &prescriptions))
    }

    fn seeds(&self, owner_id: OwnerId) -> Result<BTreeMap<i32, Quantities>> {
        Ok(self
            .store()
            .list_year_summaries(owner_id)?
            .into_iter()
            .filter(|s| s.seeded)
            .map(|s| (s.year, s.remaining_stock))
            .collect())
    }

    /// Medication bought in `year`
    pub fn entered(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        Ok(self.ledger(owner_id)?.flows(year).entered)
    }

    /// Medication given to any animal in `year`, removed animals included
    pub fn used(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        Ok(self.ledger(owner_id)?.flows(year).used)
    }

    /// The part of [`Herd::used`] drawn from calf stock
    pub fn used_on_juveniles(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        Ok(self.ledger(owner_id)?.flows(year).used_on_juveniles)
    }

    pub fn expired_writeoffs(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        Ok(self.ledger(owner_id)?.flows(year).written_off_expired)
    }

    /// Used plus written off
    pub fn total_removed(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        Ok(self.ledger(owner_id)?.flows(year).total_removed())
    }

    /// Stock left at the end of `year`; negative entries mean more went out
    /// than was recorded coming in
    pub fn remaining_stock(&self, owner_id: OwnerId, year: i32) -> Result<Quantities> {
        let ledger = self.ledger(owner_id)?;
        let seeds = self.seeds(owner_id)?;
        Ok(ledger.remaining_stock(&seeds, year))
    }

    fn compute_summary(&self, owner_id: OwnerId, year: i32) -> Result<PharmacyYearSummary> {
        let ledger = self.ledger(owner_id)?;
        let seeds = self.seeds(owner_id)?;
        let flows = ledger.flows(year);
        Ok(PharmacyYearSummary {
            owner_id,
            year,
            total_removed: flows.total_removed(),
            remaining_stock: ledger.remaining_stock(&seeds, year),
            seeded: seeds.contains_key(&year),
            entered: flows.entered,
            used: flows.used,
            used_on_juveniles: flows.used_on_juveniles,
            written_off_expired: flows.written_off_expired,
        })
    }

    /// Recompute a year from source and store it, replacing any cached copy
    pub fn update_year_summary(&self, owner_id: OwnerId, year: i32) -> Result<PharmacyYearSummary> {
        self.with_owner_lock(owner_id, || {
            let summary = self.compute_summary(owner_id, year)?;
            self.store().save_year_summary(&summary)?;
            tracing::debug!("Updated pharmacy summary {} for owner {}", year, owner_id);
            Ok(summary)
        })
    }

    /// Record a hand-counted opening stock for `year`
    ///
    /// Fails with `AlreadyExists` once the year has any stored summary.
    pub fn seed_year_stock(
        &self,
        owner_id: OwnerId,
        year: i32,
        stock: Quantities,
    ) -> Result<PharmacyYearSummary> {
        let stock = stock.into_stock_movement()?;
        self.with_owner_lock(owner_id, || {
            if self.store().get_year_summary(owner_id, year)?.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "pharmacy year {} for owner {}",
                    year, owner_id
                )));
            }

            let flows = self.ledger(owner_id)?.flows(year);
            let summary = PharmacyYearSummary {
                owner_id,
                year,
                total_removed: flows.total_removed(),
                entered: flows.entered,
                used: flows.used,
                used_on_juveniles: flows.used_on_juveniles,
                written_off_expired: flows.written_off_expired,
                remaining_stock: stock,
                seeded: true,
            };
            self.store().save_year_summary(&summary)?;
            tracing::info!(
                "Seeded pharmacy stock for owner {} in {} ({} medications)",
                owner_id,
                year,
                summary.remaining_stock.len()
            );
            Ok(summary)
        })
    }

    fn append_movement(
        &self,
        owner_id: OwnerId,
        date: NaiveDate,
        items: Quantities,
        is_expiry_writeoff: bool,
    ) -> Result<Prescription> {
        let prescription = Prescription {
            id: Uuid::new_v4(),
            owner_id,
            date,
            items: items.into_stock_movement()?,
            is_expiry_writeoff,
        };
        self.with_owner_lock(owner_id, || self.store().append_prescription(&prescription))?;
        Ok(prescription)
    }

    /// Medication coming into stock
    pub fn add_prescription(
        &self,
        owner_id: OwnerId,
        date: NaiveDate,
        items: Quantities,
    ) -> Result<Prescription> {
        let prescription = self.append_movement(owner_id, date, items, false)?;
        tracing::info!("Added prescription for owner {} on {}", owner_id, date);
        Ok(prescription)
    }

    /// Expired stock leaving the pharmacy
    pub fn add_expiry_writeoff(
        &self,
        owner_id: OwnerId,
        date: NaiveDate,
        items: Quantities,
    ) -> Result<Prescription> {
        let prescription = self.append_movement(owner_id, date, items, true)?;
        tracing::info!("Wrote off expired stock for owner {} on {}", owner_id, date);
        Ok(prescription)
    }

    pub fn year_summary(&self, owner_id: OwnerId, year: i32) -> Result<PharmacyYearSummary> {
        self.store()
            .get_year_summary(owner_id, year)?
            .ok_or_else(|| {
                Error::NotFound(format!("pharmacy year {} for owner {}", year, owner_id))
            })
    }

    pub fn year_summaries(&self, owner_id: OwnerId) -> Result<Vec<PharmacyYearSummary>> {
        self.store().list_year_summaries(owner_id)
    }

    /// Every stock movement ever recorded, most recent first
    pub fn history(&self, owner_id: OwnerId) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .all_treatments(owner_id)?
            .into_iter()
            .map(|signed| HistoryEntry {
                date: signed.treatment.treatment_date,
                medications: signed.treatment.medications,
                event: HistoryEvent::Care(signed.animal_id),
            })
            .collect();

        entries.extend(
            self.store()
                .list_prescriptions(owner_id)?
                .into_iter()
                .map(|p| HistoryEntry {
                    date: p.date,
                    event: if p.is_expiry_writeoff {
                        HistoryEvent::ExpiryWriteOff
                    } else {
                        HistoryEvent::Prescription
                    },
                    medications: p.items,
                }),
        );

        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }
}
