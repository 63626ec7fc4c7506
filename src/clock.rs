use tokio::time::Instant;

/// Monotonic nanosecond timestamps relative to the moment an endpoint was created. Only the
///  endpoint that stamped a segment ever interprets its timestamp, so the peer's clock does
///  not matter.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

impl Clock {
    pub fn new() -> Clock {
        Clock { origin: Instant::now() }
    }

    pub fn now_nanos(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos())
            .unwrap_or(i64::MAX)
    }

    /// NB: this can be negative for a corrupted or foreign timestamp
    pub fn rtt_sample_nanos(&self, echoed_timestamp: i64) -> i64 {
        self.now_nanos().saturating_sub(echoed_timestamp)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
