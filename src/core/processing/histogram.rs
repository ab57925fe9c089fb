use ndarray::{ArrayBase, Data, Dimension};

const NUM_BINS: usize = 4096;

/// Statistics and percentile estimates from a fixed-bin histogram of the
/// valid (nonzero, finite) pixels.
#[derive(Debug, Clone)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    hist: Vec<u64>,
}

impl HistogramStats {
    /// Two passes, no sorting:
    ///   1) min/max and Welford mean/std
    ///   2) histogram over [min, max], inverted per percentile query
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64> + Clone,
    {
        let mut count: u64 = 0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut mean = 0.0_f64;
        let mut m2 = 0.0_f64;

        for v in values.clone().into_iter().filter(|v| is_valid(*v)) {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            let delta = v - mean;
            mean += delta / (count as f64);
            m2 += delta * (v - mean);
        }

        if count == 0 {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
                hist: Vec::new(),
            };
        }

        let std = if count > 1 {
            (m2 / (count as f64)).sqrt()
        } else {
            0.0
        };

        let mut hist = vec![0_u64; NUM_BINS];
        let span = max - min;
        if span > f64::EPSILON {
            let inv_span = 1.0 / span;
            for v in values.into_iter().filter(|v| is_valid(*v)) {
                let t = ((v - min) * inv_span).clamp(0.0, 1.0);
                let idx = ((t * NUM_BINS as f64) as usize).min(NUM_BINS - 1);
                hist[idx] += 1;
            }
        }

        Self {
            count: count as usize,
            min,
            max,
            mean,
            std,
            hist,
        }
    }

    /// Stats over the nonzero pixels of an ndarray view.
    pub fn of_array<S, D>(arr: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        Self::from_values(arr.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Estimated value at percentile `p` (0..=100), interpolated within the bin.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let span = self.max - self.min;
        if span <= f64::EPSILON {
            return self.min;
        }
        let n = self.count as u64;
        let target = (((p / 100.0).clamp(0.0, 1.0) * n as f64).floor() as u64).min(n - 1);
        let bin_width = span / NUM_BINS as f64;

        let mut cumsum: u64 = 0;
        for (b, &h) in self.hist.iter().enumerate() {
            let next = cumsum + h;
            if target < next {
                let within = target.saturating_sub(cumsum);
                let frac = if h > 0 { within as f64 / h as f64 } else { 0.0 };
                return self.min + (b as f64 + frac) * bin_width;
            }
            cumsum = next;
        }
        self.max
    }
}

#[inline]
fn is_valid(v: f64) -> bool {
    v != 0.0 && v.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn zeros_are_ignored() {
        let arr = Array2::from_shape_vec((2, 3), vec![0.0, 2.0, 4.0, 0.0, 6.0, 8.0]).unwrap();
        let stats = HistogramStats::of_array(&arr);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 8.0);
        assert!((stats.mean - 5.0).abs() < 1e-12);
    }

    #[test]
    fn percentiles_track_uniform_ramp() {
        let values: Vec<f64> = (1..=10_000).map(|v| v as f64).collect();
        let stats = HistogramStats::from_values(values.iter().copied());
        assert!((stats.percentile(5.0) - 500.0).abs() < 10.0);
        assert!((stats.percentile(95.0) - 9500.0).abs() < 10.0);
        assert!(stats.percentile(0.0) >= stats.min);
        assert!(stats.percentile(100.0) <= stats.max);
    }

    #[test]
    fn constant_and_empty_inputs() {
        let stats = HistogramStats::from_values(vec![3.0; 10]);
        assert_eq!(stats.percentile(50.0), 3.0);
        let empty = HistogramStats::from_values(vec![0.0; 4]);
        assert!(empty.is_empty());
        assert_eq!(empty.percentile(95.0), 0.0);
    }
}
