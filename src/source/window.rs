use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One observed byte-count sample.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    pub at: Instant,
    pub bytes: u64,
}

/// Bounded, time-limited window of transfer samples.
///
/// Samples are evicted FIFO beyond `capacity` entries or `max_age`. The
/// window is owned by its `Source` and released with it; there is no shared
/// cache registry behind it.
#[derive(Debug)]
pub struct BandwidthSampleWindow {
    samples: VecDeque<BandwidthSample>,
    capacity: usize,
    max_age: Duration,
}

impl BandwidthSampleWindow {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            max_age,
        }
    }

    pub fn push(&mut self, bytes: u64) {
        self.push_at(Instant::now(), bytes);
    }

    pub fn push_at(&mut self, at: Instant, bytes: u64) {
        self.evict(at);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(BandwidthSample { at, bytes });
    }

    /// Non-expired samples, oldest first.
    pub fn samples(&mut self) -> &VecDeque<BandwidthSample> {
        self.evict(Instant::now());
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
