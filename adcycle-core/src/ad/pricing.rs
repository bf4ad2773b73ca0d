use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::error::{AdError, AdResult};
use super::models::{AdDefaults, AdRecord, ReductionStrategy};

const BASIS_POINTS: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HoldReason {
    NoPrice,
    Disabled,
    FirstPublication,
    RepostDelay { required: u32, reposts: u32 },
    DayDelay { required: u32, elapsed: i64 },
    NoFloor,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldReason::NoPrice => f.write_str("no price set"),
            HoldReason::Disabled => f.write_str("price reduction disabled"),
            HoldReason::FirstPublication => f.write_str("first publication"),
            HoldReason::RepostDelay { required, reposts } => {
                write!(f, "{reposts} of {required} reposts before reducing")
            }
            HoldReason::DayDelay { required, elapsed } => {
                write!(f, "{elapsed} of {required} days before reducing")
            }
            HoldReason::NoFloor => f.write_str("no min_price configured"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PriceOutcome {
    Held(HoldReason),
    Reduced,
    FloorReached,
}

/// Price to submit for the next publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceDecision {
    pub price: Option<u64>,
    pub previous: Option<u64>,
    pub outcome: PriceOutcome,
}

impl PriceDecision {
    fn held(price: Option<u64>, reason: HoldReason) -> Self {
        Self {
            price,
            previous: price,
            outcome: PriceOutcome::Held(reason),
        }
    }

    pub fn changed(&self) -> bool {
        self.price != self.previous
    }
}

/// Computes the next listing price from the current one. Pure with respect to
/// the ad: nothing is committed until [`PriceReductionEngine::record_success`].
#[derive(Debug, Clone)]
pub struct PriceReductionEngine {
    defaults: Arc<AdDefaults>,
}

impl PriceReductionEngine {
    pub fn new(defaults: Arc<AdDefaults>) -> Self {
        Self { defaults }
    }

    pub fn next_price(&self, ad: &AdRecord, now: DateTime<Utc>) -> AdResult<PriceDecision> {
        let config = ad.price_reduction(&self.defaults)?;
        let Some(current) = ad.price else {
            return Ok(PriceDecision::held(None, HoldReason::NoPrice));
        };
        if !config.enabled {
            return Ok(PriceDecision::held(Some(current), HoldReason::Disabled));
        }
        if ad.repost_count == 0 {
            return Ok(PriceDecision::held(
                Some(current),
                HoldReason::FirstPublication,
            ));
        }
        if ad.repost_count < config.delay_reposts {
            return Ok(PriceDecision::held(
                Some(current),
                HoldReason::RepostDelay {
                    required: config.delay_reposts,
                    reposts: ad.repost_count,
                },
            ));
        }
        if config.delay_days > 0 {
            let elapsed = ad
                .created_on
                .map(|created| (now - created).num_days())
                .unwrap_or(0);
            if elapsed < i64::from(config.delay_days) {
                return Ok(PriceDecision::held(
                    Some(current),
                    HoldReason::DayDelay {
                        required: config.delay_days,
                        elapsed,
                    },
                ));
            }
        }
        let Some(floor) = config.min_price else {
            warn!(
                title = %ad.title,
                price = current,
                "price reduction enabled without min_price; keeping current price"
            );
            return Ok(PriceDecision::held(Some(current), HoldReason::NoFloor));
        };
        if current < floor {
            return Err(AdError::invalid(
                "price_reduction.min_price",
                format!("{floor} is greater than price {current}"),
            ));
        }
        if current == floor {
            return Ok(PriceDecision {
                price: Some(floor),
                previous: Some(current),
                outcome: PriceOutcome::FloorReached,
            });
        }

        let candidate = match config.strategy {
            ReductionStrategy::Percentage => reduce_percentage(current, config.amount),
            ReductionStrategy::Fixed => current.saturating_sub(fixed_step(config.amount)),
        };
        let decision = if candidate <= floor {
            PriceDecision {
                price: Some(floor),
                previous: Some(current),
                outcome: PriceOutcome::FloorReached,
            }
        } else {
            PriceDecision {
                price: Some(candidate),
                previous: Some(current),
                outcome: PriceOutcome::Reduced,
            }
        };
        Ok(decision)
    }

    /// Commits a decision after the site confirmed the publish.
    pub fn record_success(&self, ad: &mut AdRecord, decision: &PriceDecision) {
        ad.price = decision.price;
        ad.repost_count = ad.repost_count.saturating_add(1);
        if decision.changed() {
            info!(
                title = %ad.title,
                from = ?decision.previous,
                to = ?decision.price,
                reposts = ad.repost_count,
                "price reduction applied"
            );
        }
    }
}

/// Half-up rounding on integer basis points.
fn reduce_percentage(price: u64, percent: f64) -> u64 {
    let points = (percent * 100.0).round().clamp(0.0, BASIS_POINTS as f64) as u128;
    let scaled = u128::from(price) * (BASIS_POINTS - points) + BASIS_POINTS / 2;
    u64::try_from(scaled / BASIS_POINTS).unwrap_or(u64::MAX)
}

fn fixed_step(amount: f64) -> u64 {
    if amount.is_finite() && amount > 0.0 {
        amount.round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(reduce_percentage(150, 10.0), 135);
        assert_eq!(reduce_percentage(135, 10.0), 122);
        assert_eq!(reduce_percentage(110, 10.0), 99);
        assert_eq!(reduce_percentage(5, 10.0), 5);
        assert_eq!(reduce_percentage(100, 12.5), 88);
        assert_eq!(reduce_percentage(100, 100.0), 0);
    }

    #[test]
    fn fixed_step_ignores_nonsense() {
        assert_eq!(fixed_step(15.0), 15);
        assert_eq!(fixed_step(-1.0), 0);
        assert_eq!(fixed_step(f64::NAN), 0);
    }
}
