mod publisher;
mod runner;

pub use publisher::{parse_confirmation, AdPublisher, PublishReceipt, SitePublisher};
pub use runner::{FailedAd, PublishedAd, RepublishConfig, RepublishLoop, RunHalt, RunReport};
