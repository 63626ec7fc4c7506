use std::time::Duration;
use tracing::{trace, warn};

/// Adaptive retransmission timeout, tracking an exponentially weighted RTT average and mean
///  deviation (Jacobson / Karels with gains 1/8 and 1/4).
///
/// The first sample initializes the average and sets the timeout to twice the RTT, every
///  further sample updates the deviation (against the *old* average) before the average itself.
///  The resulting timeout is kept inside `[min_timeout, max_timeout]`.
pub struct RtoEstimator {
    est_rtt_nanos: Option<i64>,
    est_dev_nanos: i64,
    timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl RtoEstimator {
    pub fn new(initial_timeout: Duration, min_timeout: Duration, max_timeout: Duration) -> RtoEstimator {
        assert!(!min_timeout.is_zero());
        assert!(min_timeout <= max_timeout);

        RtoEstimator {
            est_rtt_nanos: None,
            est_dev_nanos: 0,
            timeout: initial_timeout.clamp(min_timeout, max_timeout),
            min_timeout,
            max_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn est_rtt_nanos(&self) -> Option<i64> {
        self.est_rtt_nanos
    }

    pub fn est_dev_nanos(&self) -> i64 {
        self.est_dev_nanos
    }

    /// Feeds an RTT sample and returns the updated timeout
    pub fn on_sample(&mut self, sample_nanos: i64) -> Duration {
        let sample = if sample_nanos < 0 {
            warn!("negative RTT sample of {}ns - treating it as zero", sample_nanos);
            0
        }
        else {
            sample_nanos as i128
        };

        let raw_timeout = match self.est_rtt_nanos {
            None => {
                self.est_rtt_nanos = Some(sample as i64);
                self.est_dev_nanos = 0;
                2 * sample
            }
            Some(est_rtt) => {
                let est_rtt = est_rtt as i128;
                let est_dev = (3 * self.est_dev_nanos as i128 + (sample - est_rtt).abs()) / 4;
                let est_rtt = (7 * est_rtt + sample) / 8;

                self.est_rtt_nanos = Some(est_rtt as i64);
                self.est_dev_nanos = est_dev as i64;
                est_rtt + 4 * est_dev
            }
        };

        self.timeout = Self::nanos_to_duration(raw_timeout).clamp(self.min_timeout, self.max_timeout);
        trace!("RTT sample {}ns -> estimated RTT {:?}ns, deviation {}ns, timeout {:?}", sample, self.est_rtt_nanos, self.est_dev_nanos, self.timeout);
        self.timeout
    }

    fn nanos_to_duration(nanos: i128) -> Duration {
        match u64::try_from(nanos) {
            Ok(nanos) => Duration::from_nanos(nanos),
            Err(_) if nanos < 0 => Duration::ZERO,
            Err(_) => Duration::MAX,
        }
    }
}
