use std::collections::VecDeque;

/// Bounded FIFO of scalar energy readings.
///
/// Pushing onto a full history evicts the oldest reading, so `len()` never
/// exceeds `capacity()`.
#[derive(Debug, Clone)]
pub struct EnergyHistory {
    values: VecDeque<f32>,
    capacity: usize,
}

impl EnergyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Arithmetic mean, 0 for an empty history.
    pub fn mean(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    /// Population variance, 0 for an empty history.
    pub fn variance(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.values
            .iter()
            .map(|value| (value - mean) * (value - mean))
            .sum::<f32>()
            / self.values.len() as f32
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut history = EnergyHistory::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            history.push(value);
        }

        assert_eq!(history.len(), 3);
        assert!(history.is_full());
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn statistics_of_window() {
        let mut history = EnergyHistory::new(4);
        for value in [2.0, 4.0, 4.0, 6.0] {
            history.push(value);
        }

        assert_eq!(history.mean(), 4.0);
        assert_eq!(history.variance(), 2.0);
        history.clear();
        assert_eq!(history.mean(), 0.0);
        assert_eq!(history.variance(), 0.0);
    }
}
