mod captcha;
mod chromium;
mod error;
mod metrics;
mod page;
mod retry;
mod telemetry;
pub mod timeout;

pub use captcha::{CaptchaDecision, CaptchaEvent, CaptchaRecoveryController, CaptchaState};
pub use chromium::{ChromiumLauncher, ChromiumPageActor, ChromiumSession, CAPTCHA_SELECTORS};
pub use error::{ErrorCategorizer, FailureCategory, PageError, PageResult};
pub use metrics::ActionMetrics;
pub use page::PageActor;
pub use retry::{OperationKind, RetryExecutor, RetryFailure, RetryOutcome};
pub use telemetry::{
    summarize, MemoryTelemetry, NullTelemetry, TelemetryError, TelemetryResult, TelemetrySink,
    TimingRecord, TimingSummary, TimingTelemetry,
};
pub use timeout::{
    builtin_profile, resolve, ResolvedPolicy, RetrySettings, TimeoutProfile, TimeoutResolution,
};
