//! The single averaging primitive every rollup routes through.

/// Running `sum(value * weight) / sum(weight)`.
///
/// Pairs with a missing or non-finite value, or a weight that is not a
/// positive finite number, are ignored. An accumulator with no accepted pair
/// has no mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedMean {
    weighted_sum: f64,
    total_weight: f64,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the pair was accepted.
    pub fn push(&mut self, value: Option<f64>, weight: f64) -> bool {
        let Some(value) = value.filter(|value| value.is_finite()) else {
            return false;
        };
        if !weight.is_finite() || weight <= 0.0 {
            return false;
        }
        self.weighted_sum += value * weight;
        self.total_weight += weight;
        true
    }

    pub fn merge(&mut self, other: &WeightedMean) {
        self.weighted_sum += other.weighted_sum;
        self.total_weight += other.total_weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn value(&self) -> Option<f64> {
        if self.total_weight > 0.0 {
            Some(self.weighted_sum / self.total_weight)
        } else {
            None
        }
    }
}

impl FromIterator<(Option<f64>, f64)> for WeightedMean {
    fn from_iter<I: IntoIterator<Item = (Option<f64>, f64)>>(iter: I) -> Self {
        let mut mean = WeightedMean::new();
        for (value, weight) in iter {
            mean.push(value, weight);
        }
        mean
    }
}

/// Weighted mean of `(value, weight)` pairs, `None` when no pair carries
/// positive weight. `None` means "insufficient data", never zero.
pub fn weighted_average<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, f64)>,
{
    pairs.into_iter().collect::<WeightedMean>().value()
}
