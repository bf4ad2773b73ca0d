use serde::Serialize;

use adcycle_core::ad::{fingerprint_effective, EffectiveAd};

use crate::{AppContext, DisplayFallback, Result};

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub ads_dir: String,
    pub valid: usize,
    pub invalid: usize,
    pub entries: Vec<VerifyEntry>,
}

#[derive(Debug, Serialize)]
pub struct VerifyEntry {
    pub ad: String,
    pub ok: bool,
    pub detail: String,
}

/// Merges every ad with the defaults and reports the ones that would be
/// refused at publish time. Unreadable files count as invalid.
pub fn execute(context: &AppContext) -> Result<VerifyReport> {
    let inventory = context.load_ads()?;
    let defaults = &context.config().ad_defaults;
    let mut entries = Vec::new();
    for entry in &inventory.entries {
        let outcome = EffectiveAd::merge(&entry.record, defaults)
            .and_then(|effective| fingerprint_effective(&effective));
        entries.push(match outcome {
            Ok(hash) => VerifyEntry {
                ad: entry.label(),
                ok: true,
                detail: format!("fingerprint {}", &hash[..12]),
            },
            Err(err) => VerifyEntry {
                ad: entry.label(),
                ok: false,
                detail: err.to_string(),
            },
        });
    }
    for issue in &inventory.issues {
        entries.push(VerifyEntry {
            ad: issue.path.display().to_string(),
            ok: false,
            detail: issue.message.clone(),
        });
    }
    let invalid = entries.iter().filter(|entry| !entry.ok).count();
    Ok(VerifyReport {
        ads_dir: context.store().ads_dir().display().to_string(),
        valid: entries.len() - invalid,
        invalid,
        entries,
    })
}

impl DisplayFallback for VerifyReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Ads in {}:", self.ads_dir)];
        for entry in &self.entries {
            let status = if entry.ok { "ok" } else { "invalid" };
            lines.push(format!("[{status}] {} ({})", entry.ad, entry.detail));
        }
        lines.push(format!("{} valid, {} invalid", self.valid, self.invalid));
        lines.join("\n")
    }
}
