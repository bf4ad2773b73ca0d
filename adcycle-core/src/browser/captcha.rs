//! CAPTCHA recovery state machine.
//!
//! `Normal -> CaptchaDetected -> {ManualPause | ScheduledRestart} -> Normal`.
//! The controller never blocks; it only computes and exposes the earliest
//! time a run may resume. Sleeping until then is the caller's business.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CaptchaSection;
use crate::duration::format_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptchaEvent {
    pub detected_at: DateTime<Utc>,
    pub auto_restart: bool,
    pub restart_delay: Duration,
}

impl CaptchaEvent {
    pub fn resume_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.restart_delay)
            .ok()
            .and_then(|delay| self.detected_at.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptchaState {
    Normal,
    CaptchaDetected {
        detected_at: DateTime<Utc>,
    },
    ManualPause {
        detected_at: DateTime<Utc>,
    },
    ScheduledRestart {
        detected_at: DateTime<Utc>,
        resume_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CaptchaDecision {
    /// Stop the run and wait for a human.
    ManualPause,
    /// Abandon the remaining worklist; a new run may start at `resume_at`.
    ScheduledRestart { resume_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct CaptchaRecoveryController {
    auto_restart: bool,
    restart_delay: Duration,
    state: CaptchaState,
}

impl CaptchaRecoveryController {
    pub fn new(auto_restart: bool, restart_delay: Duration) -> Self {
        Self {
            auto_restart,
            restart_delay,
            state: CaptchaState::Normal,
        }
    }

    pub fn from_section(section: &CaptchaSection) -> Self {
        Self::new(section.auto_restart, section.restart_delay())
    }

    pub fn state(&self) -> CaptchaState {
        self.state
    }

    pub fn on_captcha(&mut self, detected_at: DateTime<Utc>) -> CaptchaEvent {
        self.state = CaptchaState::CaptchaDetected { detected_at };
        CaptchaEvent {
            detected_at,
            auto_restart: self.auto_restart,
            restart_delay: self.restart_delay,
        }
    }

    pub fn handle(&mut self, event: &CaptchaEvent) -> CaptchaDecision {
        let detected_at = event.detected_at;
        if event.auto_restart {
            let resume_at = event.resume_at();
            self.state = CaptchaState::ScheduledRestart {
                detected_at,
                resume_at,
            };
            info!(
                %resume_at,
                delay = %format_duration(event.restart_delay),
                "captcha detected, restart scheduled"
            );
            CaptchaDecision::ScheduledRestart { resume_at }
        } else {
            self.state = CaptchaState::ManualPause { detected_at };
            warn!("captcha detected, pausing for manual action");
            CaptchaDecision::ManualPause
        }
    }

    /// `on_captcha` followed by `handle`.
    pub fn detect(&mut self, detected_at: DateTime<Utc>) -> CaptchaDecision {
        let event = self.on_captcha(detected_at);
        self.handle(&event)
    }

    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            CaptchaState::ScheduledRestart { resume_at, .. } => Some(resume_at),
            _ => None,
        }
    }

    pub fn can_resume(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            CaptchaState::Normal => true,
            CaptchaState::ScheduledRestart { resume_at, .. } => now >= resume_at,
            CaptchaState::CaptchaDetected { .. } | CaptchaState::ManualPause { .. } => false,
        }
    }

    /// Time left until a scheduled restart may begin.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.resume_at()
            .map(|resume_at| (resume_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Returns to `Normal` once the resume time has passed.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CaptchaState::ScheduledRestart { resume_at, .. } if now >= resume_at => {
                self.state = CaptchaState::Normal;
                true
            }
            CaptchaState::Normal => true,
            _ => false,
        }
    }

    /// Human confirmation that the challenge was dealt with.
    pub fn acknowledge(&mut self) {
        self.state = CaptchaState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn detected() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn manual_pause_without_auto_restart() {
        let mut controller = CaptchaRecoveryController::new(false, Duration::from_secs(3_600));
        assert_eq!(controller.detect(detected()), CaptchaDecision::ManualPause);
        assert!(!controller.can_resume(detected() + chrono::Duration::days(30)));
        assert!(!controller.resume(detected() + chrono::Duration::days(30)));
        controller.acknowledge();
        assert_eq!(controller.state(), CaptchaState::Normal);
    }

    #[test]
    fn scheduled_restart_resume_time() {
        let mut controller = CaptchaRecoveryController::new(true, Duration::from_secs(90 * 60));
        let event = controller.on_captcha(detected());
        assert!(matches!(
            controller.state(),
            CaptchaState::CaptchaDetected { .. }
        ));
        let expected = detected() + chrono::Duration::minutes(90);
        assert_eq!(
            controller.handle(&event),
            CaptchaDecision::ScheduledRestart {
                resume_at: expected
            }
        );
        assert_eq!(controller.resume_at(), Some(expected));

        let early = detected() + chrono::Duration::minutes(30);
        assert!(!controller.can_resume(early));
        assert_eq!(
            controller.remaining(early),
            Some(Duration::from_secs(60 * 60))
        );
        assert!(!controller.resume(early));

        assert!(controller.resume(expected));
        assert_eq!(controller.state(), CaptchaState::Normal);
    }
}
