//! Per-leaf statistics for the `stats`/`deepstats` reports.

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Stats {
    pub count: u64,
    pub none_count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Present only for `deepstats`: every recorded scalar value, used to
    /// compute mean/median/stdev over recorded values.
    #[serde(skip)]
    values: Vec<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub stdev: Option<f64>,
}

impl Stats {
    pub fn record(&mut self, value: Option<f64>, deep: bool) {
        self.count += 1;
        match value {
            None => self.none_count += 1,
            Some(v) => {
                self.min = Some(self.min.map_or(v, |m| m.min(v)));
                self.max = Some(self.max.map_or(v, |m| m.max(v)));
                if deep {
                    self.values.push(v);
                }
            }
        }
    }

    /// Finalizes `mean`/`median`/`stdev` from recorded values
    /// (`deepstats` only; a no-op if nothing was recorded).
    pub fn finalize_deep(&mut self) {
        if self.values.is_empty() {
            return;
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = if sorted.len() % 2 == 0 {
            let mid = sorted.len() / 2;
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[sorted.len() / 2]
        };

        self.mean = Some(mean);
        self.median = Some(median);
        self.stdev = Some(variance.sqrt());
    }

    pub fn merge(&mut self, other: &Stats) {
        self.count += other.count;
        self.none_count += other.none_count;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, None) => a,
            (None, b) => b,
        };
        self.values.extend(other.values.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_min_max_count() {
        let mut s = Stats::default();
        s.record(Some(3.0), false);
        s.record(Some(1.0), false);
        s.record(None, false);
        assert_eq!(s.count, 3);
        assert_eq!(s.none_count, 1);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.max, Some(3.0));
    }

    #[test]
    fn deep_stats_compute_mean_median_stdev() {
        let mut s = Stats::default();
        for v in [1.0, 2.0, 3.0, 4.0] {
            s.record(Some(v), true);
        }
        s.finalize_deep();
        assert_eq!(s.mean, Some(2.5));
        assert_eq!(s.median, Some(2.5));
        assert!(s.stdev.unwrap() > 0.0);
    }
}
