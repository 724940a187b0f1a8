//! Rating histogram over the closed score domain `1..=10`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::sanitize;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;
const SCORE_COUNT: usize = MAX_SCORE as usize;

/// Score → count with every key present. Scores outside the domain cannot
/// be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingDistribution {
    counts: [u64; SCORE_COUNT],
}

impl RatingDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, score: u8) -> u64 {
        Self::slot(score).map(|slot| self.counts[slot]).unwrap_or(0)
    }

    /// Adds `count` to `score`. Returns `false` for out-of-domain scores.
    pub fn add(&mut self, score: u8, count: u64) -> bool {
        match Self::slot(score) {
            Some(slot) => {
                self.counts[slot] = self.counts[slot].saturating_add(count);
                true
            }
            None => false,
        }
    }

    /// Records one numeric rating rounded to the nearest score.
    pub fn record(&mut self, rating: f64) -> bool {
        if !rating.is_finite() {
            return false;
        }
        let rounded = rating.round();
        if rounded < MIN_SCORE as f64 || rounded > MAX_SCORE as f64 {
            return false;
        }
        self.add(rounded as u8, 1)
    }

    pub fn merge(&mut self, other: &RatingDistribution) {
        for (slot, count) in other.counts.iter().enumerate() {
            self.counts[slot] = self.counts[slot].saturating_add(*count);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().fold(0u64, |total, count| total.saturating_add(*count))
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// `(score, count)` pairs in ascending score order, zeros included.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(slot, count)| (slot as u8 + MIN_SCORE, *count))
    }

    /// Builds a distribution from an untrusted score map. Keys and counts go
    /// through the sanitizer; anything outside the domain is dropped.
    pub fn from_raw_map<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut distribution = Self::new();
        for (key, count) in entries {
            let score = sanitize::to_integer(&Value::String(key.to_string()));
            if let Some(score) = score.and_then(|score| u8::try_from(score).ok()) {
                distribution.add(score, sanitize::to_count(count));
            }
        }
        distribution
    }

    fn slot(score: u8) -> Option<usize> {
        (MIN_SCORE..=MAX_SCORE)
            .contains(&score)
            .then(|| (score - MIN_SCORE) as usize)
    }
}

impl FromIterator<RatingDistribution> for RatingDistribution {
    fn from_iter<I: IntoIterator<Item = RatingDistribution>>(iter: I) -> Self {
        let mut merged = RatingDistribution::new();
        for distribution in iter {
            merged.merge(&distribution);
        }
        merged
    }
}

impl Serialize for RatingDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(SCORE_COUNT))?;
        for (score, count) in self.iter() {
            map.serialize_entry(&score.to_string(), &count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RatingDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DistributionVisitor;

        impl<'de> Visitor<'de> for DistributionVisitor {
            type Value = RatingDistribution;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map from score to count")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(RatingDistribution::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut raw = BTreeMap::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    raw.insert(key, value);
                }
                Ok(RatingDistribution::from_raw_map(
                    raw.iter().map(|(key, value)| (key.as_str(), value)),
                ))
            }
        }

        deserializer.deserialize_any(DistributionVisitor)
    }
}
