use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ad::{
    AdDefaults, AdEntry, AdError, AdRecord, AdSelector, ChangeDetector, EffectiveAd,
    PriceDecision, PriceOutcome, PriceReductionEngine, SelectionExpression, Store, StoreError,
};
use crate::browser::{CaptchaDecision, CaptchaRecoveryController, CaptchaState, RetryFailure};

use super::publisher::AdPublisher;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct RepublishConfig {
    /// Evaluate selection and pricing without touching the site or the files.
    /// Implied when the loop has no publisher.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedAd {
    pub label: String,
    pub id: Option<u64>,
    pub price: Option<u64>,
    pub repost_count: u32,
    pub pricing: PriceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAd {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub attempts: u32,
    pub error: String,
}

/// Why a run stopped before its worklist was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "halt", rename_all = "snake_case")]
pub enum RunHalt {
    ManualPause,
    ScheduledRestart { resume_at: DateTime<Utc> },
    /// A restart is scheduled but its time has not come yet.
    ResumePending { resume_at: DateTime<Utc> },
    Cancelled,
    LoginFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub selected: usize,
    pub skipped_inactive: usize,
    pub published: Vec<PublishedAd>,
    pub planned: Vec<PublishedAd>,
    pub failed: Vec<FailedAd>,
    pub rejected: Vec<FailedAd>,
    pub unresolved_ids: Vec<u64>,
    /// Selected ads that were never attempted because the run halted.
    pub deferred: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<RunHalt>,
    pub duration_secs: u64,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty() && self.halt.is_none()
    }
}

#[derive(Debug, Error)]
enum AdFailure {
    #[error(transparent)]
    Invalid(#[from] AdError),
    #[error(transparent)]
    Publish(#[from] RetryFailure),
    #[error("published but not saved: {0}")]
    Persist(#[from] StoreError),
}

impl AdFailure {
    fn into_failed(self, label: String) -> FailedAd {
        let (key, attempts) = match &self {
            AdFailure::Publish(failure) => (Some(failure.key.clone()), failure.attempts),
            _ => (None, 0),
        };
        FailedAd {
            label,
            key,
            attempts,
            error: self.to_string(),
        }
    }
}

/// One pass over the inventory: select, price, publish, commit.
pub struct RepublishLoop {
    publisher: Option<Arc<dyn AdPublisher>>,
    store: Arc<dyn Store>,
    defaults: Arc<AdDefaults>,
    selector: AdSelector,
    pricing: PriceReductionEngine,
    captcha: CaptchaRecoveryController,
    config: RepublishConfig,
    cancel: CancellationToken,
    clock: Clock,
}

impl RepublishLoop {
    pub fn new(
        defaults: Arc<AdDefaults>,
        publisher: Arc<dyn AdPublisher>,
        store: Arc<dyn Store>,
        captcha: CaptchaRecoveryController,
    ) -> Self {
        Self::build(defaults, Some(publisher), store, captcha)
    }

    /// A loop that only plans: selection and next prices, no site access.
    pub fn planner(
        defaults: Arc<AdDefaults>,
        store: Arc<dyn Store>,
        captcha: CaptchaRecoveryController,
    ) -> Self {
        Self::build(defaults, None, store, captcha).with_config(RepublishConfig { dry_run: true })
    }

    fn build(
        defaults: Arc<AdDefaults>,
        publisher: Option<Arc<dyn AdPublisher>>,
        store: Arc<dyn Store>,
        captcha: CaptchaRecoveryController,
    ) -> Self {
        Self {
            publisher,
            store,
            selector: AdSelector::new(ChangeDetector::new(Arc::clone(&defaults))),
            pricing: PriceReductionEngine::new(Arc::clone(&defaults)),
            defaults,
            captcha,
            config: RepublishConfig::default(),
            cancel: CancellationToken::new(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_config(mut self, config: RepublishConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn captcha(&self) -> &CaptchaRecoveryController {
        &self.captcha
    }

    pub fn captcha_mut(&mut self) -> &mut CaptchaRecoveryController {
        &mut self.captcha
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn run(&mut self, ads: &mut [AdEntry], expression: &SelectionExpression) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();
        let now = self.now();

        if !self.captcha.resume(now) {
            report.halt = Some(match self.captcha.state() {
                CaptchaState::ScheduledRestart { resume_at, .. } => {
                    info!(%resume_at, "restart not due yet");
                    RunHalt::ResumePending { resume_at }
                }
                _ => {
                    warn!("run paused until the captcha is acknowledged");
                    RunHalt::ManualPause
                }
            });
            return report;
        }

        let active: Vec<usize> = ads
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.record.is_active(&self.defaults))
            .map(|(index, _)| index)
            .collect();
        report.skipped_inactive = ads.len() - active.len();

        let candidates: Vec<&AdRecord> = active.iter().map(|index| &ads[*index].record).collect();
        let selection = self.selector.select(&candidates, expression, now);
        report.unresolved_ids = selection.unresolved_ids.iter().copied().collect();
        for id in &report.unresolved_ids {
            warn!(id, "requested ad id not found among active ads");
        }
        report.rejected = selection
            .rejected
            .into_iter()
            .map(|rejected| {
                let label = ads[active[rejected.index]].label();
                warn!(ad = %label, error = %rejected.error, "ad rejected during selection");
                AdFailure::Invalid(rejected.error).into_failed(label)
            })
            .collect();
        let worklist: Vec<usize> = selection
            .selected
            .iter()
            .map(|index| active[*index])
            .collect();
        report.selected = worklist.len();
        info!(
            expression = %expression,
            selected = report.selected,
            inactive = report.skipped_inactive,
            dry_run = self.config.dry_run,
            "republish run started"
        );

        let publisher = match &self.publisher {
            Some(publisher) if !self.config.dry_run => Arc::clone(publisher),
            _ => {
                for index in &worklist {
                    let entry = &ads[*index];
                    match self.plan(entry) {
                        Ok((_, decision)) => report.planned.push(summary(entry, &decision)),
                        Err(err) => report.failed.push(err.into_failed(entry.label())),
                    }
                }
                report.duration_secs = started.elapsed().as_secs();
                return report;
            }
        };

        if !worklist.is_empty() {
            if let Err(failure) = publisher.prepare().await {
                let halt = self.halt_for(&failure);
                error!(error = %failure, "session setup failed");
                report.failed.push(AdFailure::Publish(failure).into_failed("login".into()));
                report.halt = Some(halt.unwrap_or(RunHalt::LoginFailed));
                report.deferred = worklist.iter().map(|index| ads[*index].label()).collect();
                report.duration_secs = started.elapsed().as_secs();
                return report;
            }
        }

        for (position, index) in worklist.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.halt = Some(RunHalt::Cancelled);
                report.deferred = labels(ads, &worklist[position..]);
                break;
            }
            let label = ads[*index].label();
            match self.process(publisher.as_ref(), &ads[*index]).await {
                Ok((committed, decision)) => {
                    report.published.push(summary(&committed, &decision));
                    ads[*index] = committed;
                }
                Err(AdFailure::Publish(failure)) if failure.is_captcha() || failure.is_cancelled() => {
                    let halt = self.halt_for(&failure);
                    warn!(ad = %label, error = %failure, "halting run");
                    report.halt = halt;
                    report.deferred = labels(ads, &worklist[position..]);
                    break;
                }
                Err(err) => {
                    warn!(ad = %label, error = %err, "ad not republished");
                    report.failed.push(err.into_failed(label));
                }
            }
        }

        report.duration_secs = started.elapsed().as_secs();
        info!(
            published = report.published.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            halt = ?report.halt,
            "republish run finished"
        );
        report
    }

    fn plan(&self, entry: &AdEntry) -> Result<(EffectiveAd, PriceDecision), AdFailure> {
        EffectiveAd::merge(&entry.record, &self.defaults)?;
        let decision = self.pricing.next_price(&entry.record, self.now())?;
        let mut candidate = entry.record.clone();
        candidate.price = decision.price;
        let effective = EffectiveAd::merge(&candidate, &self.defaults)?;
        Ok((effective, decision))
    }

    /// Publishes one ad and commits the result. The caller's record is only
    /// replaced with the returned entry once it has been persisted.
    async fn process(
        &self,
        publisher: &dyn AdPublisher,
        entry: &AdEntry,
    ) -> Result<(AdEntry, PriceDecision), AdFailure> {
        let (effective, decision) = self.plan(entry)?;
        info!(ad = %entry.label(), price = ?decision.price, "publishing ad");
        let receipt = publisher.publish(&effective).await?;

        let mut committed = entry.clone();
        let record = &mut committed.record;
        self.pricing.record_success(record, &decision);
        match record.id {
            None => record.id = Some(receipt.ad_id),
            Some(existing) if existing != receipt.ad_id => {
                debug!(existing, confirmed = receipt.ad_id, "keeping original ad id");
            }
            Some(_) => {}
        }
        let published_at = self.now();
        record.created_on.get_or_insert(published_at);
        record.updated_on = Some(published_at);
        record.content_hash = Some(self.selector.detector().fingerprint(record)?);

        if let Err(err) = self.store.persist_ad(&committed) {
            error!(ad = %entry.label(), ad_id = receipt.ad_id, error = %err, "ad published but not saved");
            return Err(err.into());
        }
        Ok((committed, decision))
    }

    fn halt_for(&mut self, failure: &RetryFailure) -> Option<RunHalt> {
        if failure.is_cancelled() {
            return Some(RunHalt::Cancelled);
        }
        if !failure.is_captcha() {
            return None;
        }
        Some(match self.captcha.detect(self.now()) {
            CaptchaDecision::ManualPause => RunHalt::ManualPause,
            CaptchaDecision::ScheduledRestart { resume_at } => {
                RunHalt::ScheduledRestart { resume_at }
            }
        })
    }
}

fn summary(entry: &AdEntry, decision: &PriceDecision) -> PublishedAd {
    PublishedAd {
        label: entry.label(),
        id: entry.record.id,
        price: decision.price,
        repost_count: entry.record.repost_count,
        pricing: decision.outcome,
    }
}

fn labels(ads: &[AdEntry], indices: &[usize]) -> Vec<String> {
    indices.iter().map(|index| ads[*index].label()).collect()
}
