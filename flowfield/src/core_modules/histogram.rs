// THEORY:
// The histogram summarises a tick's flow field as a distribution of magnitudes,
// one bin per horizontal pixel column of the output canvas. It is rebuilt from
// scratch every tick.
//
// The bin index is a linear map of the magnitude:
//     index = round(W / (max - min) * magnitude - W / (max - min))
// which is not guaranteed to land inside `[0, W)`. Magnitudes below 1 give negative
// indices and anything much larger than `max_flow` runs past the right edge. A
// `HistogramBounds` policy decides what happens to those samples, so no write
// ever lands outside the bin array.

/// What to do with a sample whose bin index falls outside the canvas columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HistogramBounds {
    /// Skip the sample and count it in `dropped`.
    #[default]
    Drop,
    /// Pile the sample into the first or last column.
    Clamp,
}

/// Per-column magnitude counts for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    bins: Vec<u32>,
    dropped: u32,
    scale: f64,
    bounds: HistogramBounds,
}

impl Histogram {
    /// A fresh, all-zero histogram with `columns` bins for the given flow range.
    pub fn new(columns: usize, min_flow: f64, max_flow: f64, bounds: HistogramBounds) -> Self {
        Self {
            bins: vec![0; columns],
            dropped: 0,
            scale: columns as f64 / (max_flow - min_flow),
            bounds,
        }
    }

    /// The unbounded column a magnitude maps to, before any policy is applied.
    pub fn raw_index(&self, magnitude: f64) -> f64 {
        (self.scale * magnitude - self.scale).round()
    }

    /// Column for a magnitude after the bounds policy, or `None` when it is dropped.
    pub fn bin_index(&self, magnitude: f64) -> Option<usize> {
        let raw = self.raw_index(magnitude);
        if !raw.is_finite() || self.bins.is_empty() {
            return None;
        }
        let last = (self.bins.len() - 1) as f64;
        match self.bounds {
            HistogramBounds::Drop if raw < 0.0 || raw > last => None,
            HistogramBounds::Drop => Some(raw as usize),
            HistogramBounds::Clamp => Some(raw.clamp(0.0, last) as usize),
        }
    }

    /// Counts one magnitude. Returns the column and its new count, or `None` if dropped.
    pub fn record(&mut self, magnitude: f64) -> Option<(usize, u32)> {
        match self.bin_index(magnitude) {
            Some(index) => {
                let bin = &mut self.bins[index];
                *bin += 1;
                Some((index, *bin))
            }
            None => {
                self.dropped += 1;
                None
            }
        }
    }

    pub fn bins(&self) -> &[u32] {
        &self.bins
    }

    /// Samples that did not land in any bin.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Samples that landed in a bin.
    pub fn binned(&self) -> u64 {
        self.bins.iter().map(|&count| count as u64).sum()
    }

    pub fn peak(&self) -> u32 {
        self.bins.iter().copied().max().unwrap_or(0)
    }

    pub fn bounds(&self) -> HistogramBounds {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_follows_the_linear_map() {
        let histogram = Histogram::new(640, 0.0, 100.0, HistogramBounds::Drop);
        // scale = 6.4 => index = round(6.4 * m - 6.4)
        assert_eq!(histogram.bin_index(1.0), Some(0));
        assert_eq!(histogram.bin_index(11.0), Some(64));
        assert_eq!(histogram.bin_index(50.5), Some(317));
    }

    #[test]
    fn huge_magnitudes_never_write_out_of_range() {
        for bounds in [HistogramBounds::Drop, HistogramBounds::Clamp] {
            let mut histogram = Histogram::new(64, 0.0, 100.0, bounds);
            for magnitude in [1e3, 1e9, f64::MAX, f64::INFINITY, -5.0, 0.0] {
                if let Some((index, _)) = histogram.record(magnitude) {
                    assert!(index < 64);
                }
            }
            assert_eq!(histogram.bins().len(), 64);
            assert_eq!(histogram.binned() + histogram.dropped() as u64, 6);
        }
    }

    #[test]
    fn clamp_piles_outliers_at_the_edges() {
        let mut histogram = Histogram::new(10, 0.0, 10.0, HistogramBounds::Clamp);
        histogram.record(500.0);
        histogram.record(0.0);
        assert_eq!(histogram.bins()[9], 1);
        assert_eq!(histogram.bins()[0], 1);
        assert_eq!(histogram.dropped(), 0);
    }

    #[test]
    fn drop_counts_what_it_skips() {
        let mut histogram = Histogram::new(10, 0.0, 10.0, HistogramBounds::Drop);
        assert_eq!(histogram.record(500.0), None);
        assert_eq!(histogram.record(0.2), None);
        assert_eq!(histogram.record(5.0), Some((4, 1)));
        assert_eq!(histogram.record(5.0), Some((4, 2)));
        assert_eq!(histogram.dropped(), 2);
        assert_eq!(histogram.binned(), 2);
        assert_eq!(histogram.peak(), 2);
    }

    #[test]
    fn nan_magnitude_is_dropped_even_when_clamping() {
        let mut histogram = Histogram::new(10, 0.0, 10.0, HistogramBounds::Clamp);
        assert_eq!(histogram.record(f64::NAN), None);
        assert_eq!(histogram.dropped(), 1);
    }

    #[test]
    fn zero_columns_drop_everything() {
        let mut histogram = Histogram::new(0, 0.0, 10.0, HistogramBounds::Clamp);
        assert_eq!(histogram.record(3.0), None);
        assert_eq!(histogram.dropped(), 1);
    }
}
