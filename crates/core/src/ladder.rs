use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::LadderError;
use crate::level::Level;

/// Price-indexed set of [`Level`] records with neighbor links
///
/// Keys are exact tick-rounded prices; callers round before lookup or insert
/// so no two levels alias the same rounded price. A lookup miss is a defined
/// "no record at this price" signal, not an error. The ladder itself is not
/// synchronized; the owning session guards it with one exclusive lock for
/// the duration of each reactor cycle.
#[derive(Debug, Default)]
pub struct Ladder {
    levels: BTreeMap<Decimal, Level>,
}

impl Ladder {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Look up the level at an exact price
    pub fn get(&self, price: Decimal) -> Option<&Level> {
        self.levels.get(&price)
    }

    /// Mutable lookup at an exact price
    pub fn get_mut(&mut self, price: Decimal) -> Option<&mut Level> {
        self.levels.get_mut(&price)
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.levels.contains_key(&price)
    }

    /// Insert a new level; fails if the price is already occupied
    pub fn insert(&mut self, level: Level) -> Result<(), LadderError> {
        if level.price <= Decimal::ZERO {
            return Err(LadderError::InvalidPrice(level.price));
        }
        if self.levels.contains_key(&level.price) {
            return Err(LadderError::Occupied(level.price));
        }
        self.levels.insert(level.price, level);
        Ok(())
    }

    /// Insert or replace the level at its price
    pub fn upsert(&mut self, level: Level) {
        self.levels.insert(level.price, level);
    }

    /// Link two existing levels as vertical neighbors
    ///
    /// `lower` and `upper` must both resolve; keys that do not resolve are
    /// left untouched.
    pub fn link(&mut self, lower: Decimal, upper: Decimal) {
        if self.levels.contains_key(&lower) && self.levels.contains_key(&upper) {
            if let Some(level) = self.levels.get_mut(&lower) {
                level.up_price = Some(upper);
            }
            if let Some(level) = self.levels.get_mut(&upper) {
                level.down_price = Some(lower);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Iterate levels in ascending price order
    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.levels.values()
    }

    /// All prices with a live bound order, ascending
    pub fn bound_prices(&self) -> Vec<Decimal> {
        self.levels
            .values()
            .filter(|l| l.is_bound())
            .map(|l| l.price)
            .collect()
    }
}
