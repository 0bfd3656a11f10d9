//! Compensated (Neumaier) accumulation.
//!
//! The discrete recursion `x[k] = x[k-1] + dt·ẋ[k-1]` runs for hundreds of
//! steps with increments many orders of magnitude smaller than `S`. A plain
//! running `f64` sum loses those low bits; tracking the rounding error of each
//! addition keeps the accumulated state at roughly twice the working precision.

/// Running sum with a separate compensation term.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NeumaierSum {
    sum: f64,
    compensation: f64,
}

impl NeumaierSum {
    pub fn new(initial: f64) -> Self {
        Self {
            sum: initial,
            compensation: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Compensated sum of a slice.
pub fn compensated_sum(values: &[f64]) -> f64 {
    let mut acc = NeumaierSum::default();
    for &v in values {
        acc.add(v);
    }
    acc.value()
}
