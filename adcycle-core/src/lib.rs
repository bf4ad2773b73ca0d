pub mod ad;
pub mod browser;
pub mod config;
pub mod duration;
pub mod error;
pub mod publish;
pub mod timestamp;
pub mod update_check;

pub use ad::{
    AdDefaults, AdEntry, AdError, AdRecord, AdSelector, ChangeDetector, EffectiveAd, FileStore,
    PriceDecision, PriceReductionEngine, SelectionExpression, Store,
};
pub use browser::{CaptchaRecoveryController, PageActor, ResolvedPolicy, RetryExecutor};
pub use config::{load_app_config, AppConfig};
pub use error::{ConfigError, Result};
pub use publish::{AdPublisher, RepublishLoop, RunHalt, RunReport, SitePublisher};
pub use update_check::{UpdateCheckOutcome, UpdateCheckState, UpdateChecker};
