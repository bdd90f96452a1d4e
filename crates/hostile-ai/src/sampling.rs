//! Seedable weighted random selection.

/// Weighted set of items drawn from with an explicit random source.
#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    items: Vec<(T, u32)>,
    total: u32,
}

impl<T> Default for WeightedSampler<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

impl<T> WeightedSampler<T> {
    /// Creates an empty sampler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item. Zero weights are kept but never drawn.
    #[must_use]
    pub fn with(mut self, item: T, weight: u32) -> Self {
        self.push(item, weight);
        self
    }

    /// Adds an item in place.
    pub fn push(&mut self, item: T, weight: u32) {
        self.total = self.total.saturating_add(weight);
        self.items.push((item, weight));
    }

    /// Sum of all weights.
    #[must_use]
    pub const fn total_weight(&self) -> u32 {
        self.total
    }

    /// Draws one item, or `None` when every weight is zero.
    pub fn pick(&self, rng: &mut fastrand::Rng) -> Option<&T> {
        if self.total == 0 {
            return None;
        }
        let mut roll = rng.u32(0..self.total);
        for (item, weight) in &self.items {
            if roll < *weight {
                return Some(item);
            }
            roll -= weight;
        }
        None
    }
}

/// Uniform duration in seconds between `min` and `max`.
pub fn random_secs(rng: &mut fastrand::Rng, min: f32, max: f32) -> f32 {
    if max <= min {
        return min;
    }
    min + rng.f32() * (max - min)
}
