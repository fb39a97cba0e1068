//! Medication-to-quantity tallies.
//!
//! A missing medication counts as zero on both sides of every operation, so
//! `a + b` and `a - b` behave like signed multiset union and difference.
//! Differences are not clamped: a negative balance means more was taken out
//! than was recorded going in.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Quantity per medication name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantities(BTreeMap<String, i64>);

impl Quantities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a user submission, rejecting a medication named twice
    pub fn from_entries<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (name, quantity) in entries {
            let name = name.into();
            if map.contains_key(&name) {
                return Err(Error::DuplicateKey(name));
            }
            map.insert(name, quantity);
        }
        Ok(Self(map))
    }

    /// Quantity for `name`, zero when absent
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Add `quantity` to the running total for `name`
    pub fn add_quantity(&mut self, name: &str, quantity: i64) {
        *self.0.entry(name.to_string()).or_insert(0) += quantity;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Drop zero entries and reject negative ones
    ///
    /// A blank line in a form arrives as zero.
    pub fn into_dose(self) -> Result<Self> {
        if let Some((name, quantity)) = self.0.iter().find(|(_, q)| **q < 0) {
            return Err(Error::InvalidQuantity(format!(
                "{} has negative quantity {}",
                name, quantity
            )));
        }
        Ok(Self(self.0.into_iter().filter(|(_, q)| *q > 0).collect()))
    }

    /// Like [`Quantities::into_dose`], but at least one item must remain
    ///
    /// Used for stock movements (prescriptions, write-offs, opening stock).
    pub fn into_stock_movement(self) -> Result<Self> {
        let kept = self.into_dose()?;
        if kept.is_empty() {
            return Err(Error::InvalidQuantity(
                "at least one medication with a positive quantity is required".into(),
            ));
        }
        Ok(kept)
    }
}

impl AddAssign<&Quantities> for Quantities {
    fn add_assign(&mut self, rhs: &Quantities) {
        for (name, quantity) in rhs.iter() {
            self.add_quantity(name, quantity);
        }
    }
}

impl SubAssign<&Quantities> for Quantities {
    fn sub_assign(&mut self, rhs: &Quantities) {
        for (name, quantity) in rhs.iter() {
            self.add_quantity(name, -quantity);
        }
    }
}

impl Add<&Quantities> for &Quantities {
    type Output = Quantities;

    fn add(self, rhs: &Quantities) -> Quantities {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Quantities> for &Quantities {
    type Output = Quantities;

    fn sub(self, rhs: &Quantities) -> Quantities {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}
