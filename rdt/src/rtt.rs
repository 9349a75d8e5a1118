//! Round-trip-time estimation and retransmission timeout.
//!
//! Reliable delivery requires that an unacknowledged segment is re-sent if no
//! ACK arrives within a bounded time.  The bound adapts to the path using the
//! classic TCP exponentially weighted moving averages:
//!
//! ```text
//! estimated' = (1 - α)·estimated + α·sample
//! deviation' = (1 - β)·deviation + β·|sample - estimated'|
//! timeout    = estimated' + K·deviation'
//! ```
//!
//! with α = 1/8, β = 1/4 and K = 4.  Unlike RFC 6298 there is no special case
//! for the first sample: the estimator starts from configured priors.
//!
//! The estimator never touches the transport; [`crate::connection::Connection`]
//! pushes [`RttEstimator::timeout`] to the transport after every update.

use std::time::Duration;

/// Adjustable timing parameters for one connection.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Estimated RTT before any sample is available.
    pub initial_rtt: Duration,
    /// RTT deviation before any sample is available.
    pub initial_deviation: Duration,
    /// Weight of a new sample in the smoothed RTT.
    pub alpha: f64,
    /// Weight of a new sample's error in the deviation.
    pub beta: f64,
    /// Deviation multiplier in the timeout.
    pub k: f64,
    /// How long the closing receiver keeps answering duplicate CLOSEs.
    pub linger: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rtt: Duration::from_millis(200),
            initial_deviation: Duration::from_millis(10),
            alpha: 0.125,
            beta: 0.25,
            k: 4.0,
            linger: Duration::from_millis(2000),
        }
    }
}

/// Smoothed RTT statistics, in milliseconds.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    alpha: f64,
    beta: f64,
    k: f64,
    estimated_ms: f64,
    deviation_ms: f64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(&TimerConfig::default())
    }
}

impl RttEstimator {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            alpha: config.alpha,
            beta: config.beta,
            k: config.k,
            estimated_ms: as_ms(config.initial_rtt),
            deviation_ms: as_ms(config.initial_deviation),
        }
    }

    /// Fold one round-trip sample into the estimate and return the new
    /// timeout.
    ///
    /// The deviation is measured against the *updated* estimate.
    pub fn record_sample(&mut self, sample: Duration) -> Duration {
        let sample_ms = as_ms(sample);
        self.estimated_ms = (1.0 - self.alpha) * self.estimated_ms + self.alpha * sample_ms;
        self.deviation_ms = (1.0 - self.beta) * self.deviation_ms
            + self.beta * (sample_ms - self.estimated_ms).abs();
        self.timeout()
    }

    pub fn estimated_ms(&self) -> f64 {
        self.estimated_ms
    }

    pub fn deviation_ms(&self) -> f64 {
        self.deviation_ms
    }

    /// `estimated + K·deviation`, unrounded.
    pub fn timeout_ms(&self) -> f64 {
        self.estimated_ms + self.k * self.deviation_ms
    }

    /// The current timeout as a transport deadline.
    ///
    /// Never zero: a zero timeout would mean "wait forever" to some
    /// transports.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_ms() / 1000.0).max(Duration::from_millis(1))
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn starts_from_configured_priors() {
        let est = RttEstimator::default();
        assert!(close(est.estimated_ms(), 200.0));
        assert!(close(est.deviation_ms(), 10.0));
        assert!(close(est.timeout_ms(), 240.0));
        let diff = est.timeout().abs_diff(Duration::from_millis(240));
        assert!(diff < Duration::from_micros(1));
    }

    #[test]
    fn single_sample_matches_the_ewma_formulas() {
        let mut est = RttEstimator::default();
        let timeout = est.record_sample(Duration::from_millis(250));

        assert!(close(est.estimated_ms(), 206.25));
        assert!(close(est.deviation_ms(), 18.4375));
        assert!(close(est.timeout_ms(), 206.25 + 4.0 * 18.4375));
        assert!(timeout > Duration::from_millis(279) && timeout <= Duration::from_millis(280));
    }

    #[test]
    fn faster_samples_shrink_the_estimate() {
        let mut est = RttEstimator::default();
        est.record_sample(Duration::from_millis(40));
        // 0.875·200 + 0.125·40 = 180; 0.75·10 + 0.25·140 = 42.5
        assert!(close(est.estimated_ms(), 180.0));
        assert!(close(est.deviation_ms(), 42.5));
    }

    #[test]
    fn steady_samples_converge() {
        let mut est = RttEstimator::default();
        for _ in 0..200 {
            est.record_sample(Duration::from_millis(50));
        }
        assert!((est.estimated_ms() - 50.0).abs() < 0.01);
        assert!(est.deviation_ms() < 0.01);
        assert!(est.timeout() >= Duration::from_millis(50));
    }

    #[test]
    fn timeout_is_never_zero() {
        let mut est = RttEstimator::new(&TimerConfig {
            initial_rtt: Duration::ZERO,
            initial_deviation: Duration::ZERO,
            ..TimerConfig::default()
        });
        est.record_sample(Duration::ZERO);
        assert_eq!(est.timeout(), Duration::from_millis(1));
    }

    #[test]
    fn custom_weights_are_honoured() {
        let mut est = RttEstimator::new(&TimerConfig {
            alpha: 1.0,
            beta: 1.0,
            ..TimerConfig::default()
        });
        est.record_sample(Duration::from_millis(70));
        assert!(close(est.estimated_ms(), 70.0));
        assert!(close(est.deviation_ms(), 0.0));
    }
}
