use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use serde::Serialize;

use adcycle_core::ad::{
    AdRecord, AdSelector, ChangeDetector, PriceOutcome, PriceReductionEngine, SelectionExpression,
};

use crate::{AppContext, DisplayFallback, Result};

pub const DEFAULT_SELECTION: &str = "new,due";

#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Selection expression: all, due, new, changed and/or ad ids, comma separated
    #[arg(long, default_value = DEFAULT_SELECTION)]
    pub ads: String,
}

#[derive(Debug, Serialize)]
pub struct SelectReport {
    pub expression: String,
    pub inactive: usize,
    pub selected: Vec<SelectedAd>,
    pub unresolved_ids: Vec<u64>,
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Serialize)]
pub struct SelectedAd {
    pub ad: String,
    pub id: Option<u64>,
    pub price: Option<u64>,
    pub next_price: Option<u64>,
    pub pricing: Option<PriceOutcome>,
}

#[derive(Debug, Serialize)]
pub struct RejectedEntry {
    pub ad: String,
    pub error: String,
}

pub fn execute(context: &AppContext, args: &SelectArgs) -> Result<SelectReport> {
    let expression: SelectionExpression = args.ads.parse()?;
    let inventory = context.load_ads()?;
    let defaults = Arc::new(context.config().ad_defaults.clone());
    let selector = AdSelector::new(ChangeDetector::new(Arc::clone(&defaults)));
    let pricing = PriceReductionEngine::new(Arc::clone(&defaults));
    let now = Utc::now();

    let active: Vec<_> = inventory
        .entries
        .iter()
        .filter(|entry| entry.record.is_active(&defaults))
        .collect();
    let records: Vec<&AdRecord> = active.iter().map(|entry| &entry.record).collect();
    let outcome = selector.select(&records, &expression, now);

    let selected = outcome
        .pick(&active)
        .into_iter()
        .map(|entry| {
            let decision = pricing.next_price(&entry.record, now).ok();
            SelectedAd {
                ad: entry.label(),
                id: entry.record.id,
                price: entry.record.price,
                next_price: decision.and_then(|decision| decision.price),
                pricing: decision.map(|decision| decision.outcome),
            }
        })
        .collect();
    let rejected = outcome
        .rejected
        .iter()
        .map(|rejected| RejectedEntry {
            ad: active
                .get(rejected.index)
                .map(|entry| entry.label())
                .unwrap_or_default(),
            error: rejected.error.to_string(),
        })
        .collect();

    Ok(SelectReport {
        expression: expression.to_string(),
        inactive: inventory.entries.len() - active.len(),
        selected,
        unresolved_ids: outcome.unresolved_ids.iter().copied().collect(),
        rejected,
    })
}

impl DisplayFallback for SelectReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Selection '{}': {} ad(s), {} inactive skipped",
            self.expression,
            self.selected.len(),
            self.inactive
        )];
        for ad in &self.selected {
            let price = match (ad.price, ad.next_price) {
                (Some(current), Some(next)) if current != next => format!("{current} -> {next}"),
                (Some(current), _) => current.to_string(),
                _ => "-".to_string(),
            };
            lines.push(format!("  - {} price={price}", ad.ad));
        }
        for rejected in &self.rejected {
            lines.push(format!("  ! {}: {}", rejected.ad, rejected.error));
        }
        if !self.unresolved_ids.is_empty() {
            let ids: Vec<String> = self.unresolved_ids.iter().map(u64::to_string).collect();
            lines.push(format!("Unknown ids: {}", ids.join(", ")));
        }
        lines.join("\n")
    }
}
