use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Time- and count-bounded sample series used by the analytics subsystems.
///
/// Samples are appended in arrival order; `trim` drops everything older
/// than the window. Trimming happens in the owning coordinator's lane, so
/// the series itself needs no synchronization.
#[derive(Debug, Clone)]
pub struct RollingSeries<T> {
    samples: VecDeque<(DateTime<Utc>, T)>,
    window: Duration,
    max_samples: usize,
}

impl<T> RollingSeries<T> {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, value: T) {
        self.samples.push_back((timestamp, value));
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn push_now(&mut self, value: T) {
        self.push(Utc::now(), value);
    }

    /// Drop samples older than the window, measured against `now`.
    pub fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some((ts, _)) = self.samples.front() {
            if *ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&T> {
        self.samples.back().map(|(_, v)| v)
    }

    pub fn oldest(&self) -> Option<&T> {
        self.samples.front().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, T)> {
        self.samples.iter()
    }
}

impl RollingSeries<f64> {
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|(_, v)| *v).collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.values().iter().mean())
    }

    pub fn std_dev(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        Some(self.values().iter().std_dev())
    }

    /// Simple period-over-period returns of the series.
    pub fn returns(&self) -> Vec<f64> {
        let values = self.values();
        values
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect()
    }

    /// Standard deviation of returns; the per-token volatility input.
    pub fn return_volatility(&self) -> Option<f64> {
        let returns = self.returns();
        if returns.len() < 2 {
            return None;
        }
        Some(returns.iter().std_dev())
    }
}

/// Pearson correlation over the aligned tails of two price series.
///
/// Alignment is positional over the most recent `min(len_a, len_b)`
/// samples; both series are expected to be sampled on the same cadence.
pub fn pearson_correlation(a: &RollingSeries<f64>, b: &RollingSeries<f64>) -> Option<f64> {
    let va = a.values();
    let vb = b.values();
    let n = va.len().min(vb.len());
    if n < 3 {
        return None;
    }
    let va = &va[va.len() - n..];
    let vb = &vb[vb.len() - n..];

    let mean_a = va.iter().mean();
    let mean_b = vb.iter().mean();
    let std_a = va.iter().std_dev();
    let std_b = vb.iter().std_dev();
    if std_a == 0.0 || std_b == 0.0 || !std_a.is_finite() || !std_b.is_finite() {
        return None;
    }

    let cov = va
        .iter()
        .zip(vb.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / (n as f64 - 1.0);

    Some(cov / (std_a * std_b))
}
