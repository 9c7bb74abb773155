use std::collections::VecDeque;

/// Ring buffer of the most recent global errors used by the plateau test.
#[derive(Clone, Debug)]
pub struct ErrorStatistic {
    values: VecDeque<f64>,
    capacity: usize,
}

impl ErrorStatistic {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, value: f64) {
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

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Average slope over the last `width` steps.
    ///
    /// `None` if fewer than `width + 1` samples are buffered.
    pub fn wide_slope(&self, width: usize) -> Option<f64> {
        let n = self.values.len();
        if width == 0 || width >= n {
            return None;
        }
        let newest = self.values[n - 1];
        let oldest = self.values[n - 1 - width];
        Some((newest - oldest) / width as f64)
    }
}
