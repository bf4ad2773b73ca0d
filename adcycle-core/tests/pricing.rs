use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use adcycle_core::ad::{
    AdDefaults, AdError, AdRecord, ContactInfo, EffectiveAd, HoldReason, PriceOutcome,
    PriceReductionEngine, PriceReductionSettings, ReductionStrategy,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn ad(price: u64, strategy: ReductionStrategy, amount: f64, floor: Option<u64>) -> AdRecord {
    AdRecord {
        title: "Solid oak writing desk".into(),
        description: "Lightly used, pickup only.".into(),
        category: "80001".into(),
        price: Some(price),
        contact: ContactInfo {
            name: Some("Jo".into()),
            ..ContactInfo::default()
        },
        price_reduction: PriceReductionSettings {
            enabled: Some(true),
            strategy: Some(strategy),
            amount: Some(amount),
            min_price: floor,
            ..PriceReductionSettings::default()
        },
        ..AdRecord::default()
    }
}

/// Prices submitted on each confirmed publish.
fn published_prices(engine: &PriceReductionEngine, mut record: AdRecord, runs: usize) -> Vec<u64> {
    let mut prices = Vec::new();
    for _ in 0..runs {
        let decision = engine.next_price(&record, now()).unwrap();
        prices.push(decision.price.unwrap());
        engine.record_success(&mut record, &decision);
    }
    prices
}

fn engine() -> PriceReductionEngine {
    PriceReductionEngine::new(Arc::new(AdDefaults::default()))
}

#[test]
fn percentage_reduction_walks_down_to_the_floor() {
    let prices = published_prices(
        &engine(),
        ad(150, ReductionStrategy::Percentage, 10.0, Some(90)),
        7,
    );
    assert_eq!(prices, vec![150, 135, 122, 110, 99, 90, 90]);
}

#[test]
fn fixed_reduction_lands_on_the_floor() {
    let prices = published_prices(
        &engine(),
        ad(150, ReductionStrategy::Fixed, 15.0, Some(90)),
        6,
    );
    assert_eq!(prices, vec![150, 135, 120, 105, 90, 90]);
}

#[test]
fn next_price_is_idempotent_until_committed() {
    let engine = engine();
    let mut record = ad(150, ReductionStrategy::Percentage, 10.0, Some(90));
    record.repost_count = 3;
    let first = engine.next_price(&record, now()).unwrap();
    let second = engine.next_price(&record, now()).unwrap();
    assert_eq!(first, second);
    assert_eq!(record.price, Some(150));
    assert_eq!(record.repost_count, 3);
}

#[test]
fn price_never_increases_and_never_drops_below_floor() {
    let engine = engine();
    for (strategy, amount) in [
        (ReductionStrategy::Percentage, 33.0),
        (ReductionStrategy::Fixed, 70.0),
        (ReductionStrategy::Percentage, 100.0),
    ] {
        let prices = published_prices(&engine, ad(200, strategy, amount, Some(45)), 8);
        assert!(prices.windows(2).all(|pair| pair[1] <= pair[0]), "{prices:?}");
        assert!(prices.iter().all(|price| *price >= 45), "{prices:?}");
        assert_eq!(prices.last(), Some(&45));
    }
}

#[test]
fn missing_floor_holds_the_price() {
    let engine = engine();
    let mut record = ad(150, ReductionStrategy::Percentage, 10.0, None);
    record.repost_count = 4;
    let decision = engine.next_price(&record, now()).unwrap();
    assert_eq!(decision.price, Some(150));
    assert_eq!(decision.outcome, PriceOutcome::Held(HoldReason::NoFloor));
}

#[test]
fn delays_hold_the_price() {
    let engine = engine();
    let mut record = ad(150, ReductionStrategy::Fixed, 10.0, Some(50));
    record.price_reduction.delay_reposts = Some(3);
    record.repost_count = 2;
    assert_eq!(
        engine.next_price(&record, now()).unwrap().outcome,
        PriceOutcome::Held(HoldReason::RepostDelay {
            required: 3,
            reposts: 2
        })
    );

    record.repost_count = 3;
    record.price_reduction.delay_days = Some(10);
    record.created_on = Some(now() - Duration::days(4));
    assert_eq!(
        engine.next_price(&record, now()).unwrap().outcome,
        PriceOutcome::Held(HoldReason::DayDelay {
            required: 10,
            elapsed: 4
        })
    );

    record.created_on = Some(now() - Duration::days(10));
    let decision = engine.next_price(&record, now()).unwrap();
    assert_eq!(decision.price, Some(140));
    assert_eq!(decision.outcome, PriceOutcome::Reduced);
}

#[test]
fn defaults_enable_reduction_for_every_ad() {
    let defaults = AdDefaults {
        price_reduction: PriceReductionSettings {
            enabled: Some(true),
            strategy: Some(ReductionStrategy::Fixed),
            amount: Some(5.0),
            min_price: Some(10),
            ..PriceReductionSettings::default()
        },
        ..AdDefaults::default()
    };
    let engine = PriceReductionEngine::new(Arc::new(defaults));
    let mut record = ad(40, ReductionStrategy::Fixed, 5.0, None);
    record.price_reduction = PriceReductionSettings::default();
    record.repost_count = 1;
    assert_eq!(engine.next_price(&record, now()).unwrap().price, Some(35));
}

#[test]
fn enabled_without_amount_is_rejected() {
    let engine = engine();
    let mut record = ad(150, ReductionStrategy::Fixed, 10.0, Some(50));
    record.price_reduction.amount = None;
    record.repost_count = 1;
    assert!(engine.next_price(&record, now()).is_err());
}

#[test]
fn floor_above_current_price_is_rejected_not_applied() {
    let engine = engine();
    let mut record = ad(50, ReductionStrategy::Fixed, 5.0, Some(90));
    record.repost_count = 2;
    let err = engine.next_price(&record, now()).unwrap_err();
    assert!(
        matches!(err, AdError::Invalid { ref field, .. } if field == "price_reduction.min_price"),
        "{err}"
    );
    assert!(EffectiveAd::merge(&record, &AdDefaults::default()).is_err());

    record.price = Some(90);
    let decision = engine.next_price(&record, now()).unwrap();
    assert_eq!(decision.price, Some(90));
    assert_eq!(decision.outcome, PriceOutcome::FloorReached);
    assert!(!decision.changed());
}
