use std::time::{Duration, Instant};

/// Append-only completion-timestamp log, pre-sized for a whole run. One entry
/// per completed half-round, in observation order; index `2*round + half`.
#[derive(Debug)]
pub struct LatencyLog {
    start: Instant,
    stamps: Vec<Instant>,
}

impl LatencyLog {
    pub fn with_capacity(rounds: usize) -> LatencyLog {
        LatencyLog {
            start: Instant::now(),
            stamps: Vec::with_capacity(rounds * 2),
        }
    }

    /// Re-arms the pre-loop reference point. Called once, right before the
    /// first round.
    pub fn restart(&mut self) {
        debug_assert!(self.stamps.is_empty());
        self.start = Instant::now();
    }

    pub fn record(&mut self) {
        self.stamps.push(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn stamps(&self) -> &[Instant] {
        &self.stamps
    }

    /// Derives the run summary for a given transfer size. Pure function of
    /// the recorded sequence; nothing here is cached.
    pub fn summary(&self, size: usize) -> Summary {
        let elapsed = match self.stamps.last() {
            Some(last) => *last - self.start,
            None => Duration::ZERO,
        };
        let mut min_gap = Duration::MAX;
        let mut max_gap = Duration::ZERO;
        let mut prev = self.start;
        for stamp in &self.stamps {
            let gap = *stamp - prev;
            min_gap = min_gap.min(gap);
            max_gap = max_gap.max(gap);
            prev = *stamp;
        }
        if self.stamps.is_empty() {
            min_gap = Duration::ZERO;
        }
        Summary {
            samples: self.stamps.len(),
            bytes: self.stamps.len() * size,
            elapsed,
            min_gap,
            max_gap,
        }
    }
}

/// Summary statistics of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub samples: usize,
    pub bytes: usize,
    pub elapsed: Duration,
    pub min_gap: Duration,
    pub max_gap: Duration,
}

impl Summary {
    /// Aggregate rate in bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.bytes as f64 / secs } else { 0.0 }
    }

    /// Average one-way latency: elapsed span over all half-rounds.
    pub fn mean_one_way(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.samples as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_non_decreasing() {
        let mut log = LatencyLog::with_capacity(8);
        log.restart();
        for _ in 0..16 {
            log.record();
        }
        assert_eq!(log.len(), 16);
        assert!(log.stamps().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn summary_accounts_every_half_round() {
        let mut log = LatencyLog::with_capacity(8);
        log.restart();
        for _ in 0..16 {
            log.record();
        }
        let summary = log.summary(4096);
        assert_eq!(summary.samples, 16);
        assert_eq!(summary.bytes, 65536);
        assert!(summary.elapsed >= summary.min_gap);
        assert!(summary.max_gap >= summary.min_gap);
        assert!(summary.mean_one_way() <= summary.elapsed);
    }

    #[test]
    fn empty_log_yields_a_zero_summary() {
        let log = LatencyLog::with_capacity(4);
        let summary = log.summary(512);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.elapsed, Duration::ZERO);
        assert_eq!(summary.throughput(), 0.0);
        assert_eq!(summary.mean_one_way(), Duration::ZERO);
    }
}
