pub mod error;
pub mod fingerprint;
pub mod models;
pub mod pricing;
pub mod selection;
pub mod store;

pub use error::{AdError, AdResult};
pub use fingerprint::{fingerprint, fingerprint_effective, ChangeDetector};
pub use models::{
    AdDefaults, AdEntry, AdRecord, AdType, ContactInfo, EffectiveAd, PriceReductionConfig,
    PriceReductionSettings, PriceType, ReductionStrategy, ShippingType, MAX_DESCRIPTION_LENGTH,
};
pub use pricing::{HoldReason, PriceDecision, PriceOutcome, PriceReductionEngine};
pub use selection::{
    AdSelector, RejectedAd, SelectionError, SelectionExpression, SelectionOutcome,
    SelectionPredicate, SelectionResult,
};
pub use store::{AdInventory, FileStore, LoadIssue, Store, StoreError, StoreResult};
