#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Latched open. Only an explicit reset closes it again.
    Open,
}

/// Consecutive-failure breaker that latches open.
///
/// Tripping resets the failure counter so the trip is reported exactly once.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub trips: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self { state: CircuitState::Closed, failures: 0, threshold: threshold.max(1), trips: 0 }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Count a failure. Returns true only on the call that trips the breaker.
    pub fn record_failure(&mut self) -> bool {
        if self.state == CircuitState::Open {
            return false;
        }
        self.failures += 1;
        if self.failures >= self.threshold {
            self.state = CircuitState::Open;
            self.failures = 0;
            self.trips += 1;
            return true;
        }
        false
    }

    pub fn allow(&self) -> bool {
        self.state == CircuitState::Closed
    }

    /// Manual re-enable.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
    }
}
