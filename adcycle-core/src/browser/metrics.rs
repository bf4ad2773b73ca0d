use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub captchas: u64,
    pub exhausted: u64,
}

impl ActionMetrics {
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.successes = self.successes.saturating_add(1);
    }

    pub fn record_failure(&mut self, timed_out: bool) {
        self.failures = self.failures.saturating_add(1);
        if timed_out {
            self.timeouts = self.timeouts.saturating_add(1);
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub fn record_captcha(&mut self) {
        self.captchas = self.captchas.saturating_add(1);
    }

    pub fn record_exhausted(&mut self) {
        self.exhausted = self.exhausted.saturating_add(1);
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (self.successes as f64 / self.attempts as f64) * 100.0
        }
    }
}
