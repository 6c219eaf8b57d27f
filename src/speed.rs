use std::time::Duration;

/// How many samples the average covers. Samples are taken about once a
/// second, so this is roughly a minute.
const WINDOW: usize = 60;

/// Moving average of transfer speed over the last `WINDOW` samples.
pub struct MovingAverage {
    window_bytes: [u64; WINDOW],
    window_millis: [u64; WINDOW],
    index: usize,
    high_water: usize,
}

impl MovingAverage {
    pub fn new() -> Self {
        Self {
            window_bytes: [0; WINDOW],
            window_millis: [0; WINDOW],
            index: 0,
            high_water: 0,
        }
    }

    pub fn add(&mut self, bytes: u64, elapsed: Duration) {
        self.window_bytes[self.index] = bytes;
        self.window_millis[self.index] = elapsed.as_millis() as u64;
        self.index = (self.index + 1) % WINDOW;
        if self.high_water < WINDOW {
            self.high_water += 1;
        }
    }

    /// Zero until a sample with a non-zero duration was added.
    pub fn bytes_per_second(&self) -> f64 {
        let sum_bytes: u64 = self.window_bytes[..self.high_water].iter().sum();
        let sum_millis: u64 = self.window_millis[..self.high_water].iter().sum();
        if sum_millis == 0 {
            return 0f64;
        }
        sum_bytes as f64 * 1000f64 / sum_millis as f64
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new()
    }
}
