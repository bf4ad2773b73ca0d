use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adcycle_core::ad::SelectionExpression;
use adcycle_core::browser::{
    ActionMetrics, CaptchaRecoveryController, ChromiumLauncher, ChromiumSession, NullTelemetry,
    ResolvedPolicy, RetryExecutor, TelemetrySink, TimingTelemetry,
};
use adcycle_core::duration::format_duration;
use adcycle_core::publish::{AdPublisher, RepublishLoop, RunHalt, RunReport, SitePublisher};
use adcycle_core::AppConfig;

use super::select::DEFAULT_SELECTION;
use crate::{AppContext, DisplayFallback, Result};

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Selection expression: all, due, new, changed and/or ad ids, comma separated
    #[arg(long, default_value = DEFAULT_SELECTION)]
    pub ads: String,
    /// Evaluate selection and prices without opening a browser
    #[arg(long)]
    pub dry_run: bool,
    /// Return after the first run instead of waiting for a scheduled restart
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct PublishSummary {
    pub runs: Vec<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ActionMetrics>,
}

impl PublishSummary {
    /// The last run stopped on a captcha that needs a human.
    pub fn paused(&self) -> bool {
        self.runs
            .last()
            .is_some_and(|run| run.halt == Some(RunHalt::ManualPause))
    }
}

pub fn execute(context: &AppContext, args: &PublishArgs) -> Result<PublishSummary> {
    let expression: SelectionExpression = args.ads.parse()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(publish(context, args, expression))
}

async fn publish(
    context: &AppContext,
    args: &PublishArgs,
    expression: SelectionExpression,
) -> Result<PublishSummary> {
    let config = context.config();
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            watcher.cancel();
        }
    });

    let policy = Arc::new(ResolvedPolicy::from_section(&config.timeouts));
    let executor = RetryExecutor::new(Arc::clone(&policy))
        .with_telemetry(open_telemetry(config)?)
        .with_cancellation(cancel.clone());
    info!(
        session = executor.session_id(),
        profile = policy.profile_name(),
        multiplier = policy.multiplier(),
        dry_run = args.dry_run,
        "publish session started"
    );

    let (publisher, session): (Option<Arc<dyn AdPublisher>>, Option<ChromiumSession>) =
        if args.dry_run {
            (None, None)
        } else {
            let session = ChromiumLauncher::new(config.browser.clone(), Arc::clone(&policy))
                .launch()
                .await?;
            let actor = session.new_actor().await?;
            let site = SitePublisher::new(
                actor,
                executor.clone(),
                &config.site.base_url,
                config.login.clone(),
            );
            let site: Arc<dyn AdPublisher> = Arc::new(site);
            (Some(site), Some(session))
        };

    let mut inventory = context.load_ads()?;
    let defaults = Arc::new(config.ad_defaults.clone());
    let store = Arc::new(context.store().clone());
    let captcha = CaptchaRecoveryController::from_section(&config.captcha);
    let mut runner = match publisher {
        Some(publisher) => RepublishLoop::new(defaults, publisher, store, captcha),
        None => RepublishLoop::planner(defaults, store, captcha),
    }
    .with_cancellation(cancel.clone());

    let mut summary = PublishSummary::default();
    loop {
        let report = runner.run(&mut inventory.entries, &expression).await;
        let resume_at = match report.halt {
            Some(RunHalt::ScheduledRestart { resume_at })
            | Some(RunHalt::ResumePending { resume_at }) => Some(resume_at),
            _ => None,
        };
        summary.runs.push(report);
        let Some(resume_at) = resume_at else {
            break;
        };
        if args.once {
            break;
        }
        let wait = (resume_at - Utc::now()).to_std().unwrap_or_default();
        info!(%resume_at, wait = %format_duration(wait), "waiting for scheduled restart");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => {}
        }
    }

    drop(runner);
    if let Some(session) = session {
        if let Err(err) = session.shutdown().await {
            warn!(error = %err, "browser did not shut down cleanly");
        }
    }
    summary.metrics = Some(executor.metrics());
    Ok(summary)
}

fn open_telemetry(config: &AppConfig) -> Result<Arc<dyn TelemetrySink>> {
    if !config.telemetry.enabled {
        return Ok(Arc::new(NullTelemetry));
    }
    let sink = TimingTelemetry::from_section(&config.telemetry, |path| config.resolve_path(path))?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.telemetry.retention_days));
    let pruned = sink.prune_older_than(cutoff)?;
    if pruned > 0 {
        debug!(pruned, "pruned old timing records");
    }
    Ok(Arc::new(sink))
}

impl DisplayFallback for PublishSummary {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for (index, run) in self.runs.iter().enumerate() {
            lines.push(format!(
                "Run {}: {} selected, {} published, {} failed, {} inactive",
                index + 1,
                run.selected,
                run.published.len(),
                run.failed.len(),
                run.skipped_inactive
            ));
            for ad in &run.planned {
                let price = ad
                    .price
                    .map(|price| price.to_string())
                    .unwrap_or_else(|| "-".to_string());
                lines.push(format!("  ~ {} would publish at {price}", ad.label));
            }
            for ad in &run.published {
                let id = ad.id.map(|id| id.to_string()).unwrap_or_default();
                lines.push(format!("  + {} #{id} (repost {})", ad.label, ad.repost_count));
            }
            for ad in run.failed.iter().chain(&run.rejected) {
                lines.push(format!("  ! {}: {}", ad.label, ad.error));
            }
            for id in &run.unresolved_ids {
                lines.push(format!("  ? unknown id {id}"));
            }
            match run.halt {
                Some(RunHalt::ManualPause) => lines.push(format!(
                    "  Captcha: paused, {} ad(s) deferred",
                    run.deferred.len()
                )),
                Some(RunHalt::ScheduledRestart { resume_at })
                | Some(RunHalt::ResumePending { resume_at }) => lines.push(format!(
                    "  Captcha: restart at {}, {} ad(s) deferred",
                    resume_at.to_rfc3339(),
                    run.deferred.len()
                )),
                Some(RunHalt::Cancelled) => lines.push(format!(
                    "  Cancelled, {} ad(s) not attempted",
                    run.deferred.len()
                )),
                Some(RunHalt::LoginFailed) => lines.push("  Login failed".to_string()),
                None => {}
            }
        }
        if let Some(metrics) = &self.metrics {
            lines.push(format!(
                "Operations: {} attempts, {} retries, {} timeouts, {:.1}% success",
                metrics.attempts,
                metrics.retries,
                metrics.timeouts,
                metrics.success_rate()
            ));
        }
        lines.join("\n")
    }
}
