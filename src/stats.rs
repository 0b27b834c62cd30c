use serde::{Deserialize, Serialize};

/// Running mean and spread of a stream of values.
///
/// Undefined statistics are reported as `None` and left out of the
/// serialized report.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    m2: f64,
    range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        let delta = val - self.mean;
        self.mean += delta / self.n_vals as f64;
        self.m2 += delta * (val - self.mean);
        self.range = Some(match self.range {
            None => (val, val),
            Some((lo, hi)) => (lo.min(val), hi.max(val)),
        });
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: (self.n_vals > 0).then_some(self.mean),
            std_dev: (self.n_vals > 1).then(|| (self.m2 / (self.n_vals - 1) as f64).sqrt()),
            min: self.range.map(|(lo, _)| lo),
            max: self.range.map(|(_, hi)| hi),
        }
    }
}

/// Values recorded once per round, kept in order.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    #[serde(flatten)]
    pub summary: AccumulatorReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<f64>,
    /// Least-squares slope per round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> TimeSeriesReport {
        let mut acc = Accumulator::new();
        for &val in &self.vals {
            acc.add(val);
        }
        TimeSeriesReport {
            summary: acc.report(),
            first: self.vals.first().copied(),
            last: self.vals.last().copied(),
            trend: slope(&self.vals),
        }
    }
}

fn slope(vals: &[f64]) -> Option<f64> {
    let n_vals = vals.len();
    if n_vals < 2 {
        return None;
    }
    let t_mean = (n_vals - 1) as f64 / 2.0;
    let v_mean = vals.iter().sum::<f64>() / n_vals as f64;
    let (cov, var) = vals
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(cov, var), (t, &val)| {
            let dt = t as f64 - t_mean;
            (cov + dt * (val - v_mean), var + dt * dt)
        });
    Some(cov / var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_mean_and_spread() {
        let mut acc = Accumulator::new();
        for val in [1.0, 2.0, 3.0, 4.0] {
            acc.add(val);
        }
        let report = acc.report();
        assert_eq!(report.n_vals, 4);
        assert!((report.mean.unwrap() - 2.5).abs() < 1e-12);
        assert!((report.std_dev.unwrap() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!((report.min, report.max), (Some(1.0), Some(4.0)));
    }

    #[test]
    fn undefined_statistics_are_left_out() {
        let report = Accumulator::new().report();
        assert_eq!(report.mean, None);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({ "n_vals": 0 }));

        let mut acc = Accumulator::new();
        acc.add(f64::NAN);
        let json = serde_json::to_value(acc.report()).unwrap();
        // A real NaN still shows up, as null, next to the missing spread.
        assert!(json["mean"].is_null());
        assert!(json.get("mean").is_some());
        assert!(json.get("std_dev").is_none());
    }

    #[test]
    fn series_reports_ends_and_trend() {
        let mut series = TimeSeries::new();
        for val in [1.0, 1.5, 2.0, 2.5] {
            series.push(val);
        }
        let report = series.report();
        assert_eq!(report.first, Some(1.0));
        assert_eq!(report.last, Some(2.5));
        assert!((report.trend.unwrap() - 0.5).abs() < 1e-12);
        assert!((report.summary.mean.unwrap() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn single_value_series_has_no_trend() {
        let mut series = TimeSeries::new();
        series.push(1.0);
        let report = series.report();
        assert_eq!(report.trend, None);
        assert_eq!(report.summary.std_dev, None);
        assert_eq!(report.summary.mean, Some(1.0));
    }
}
