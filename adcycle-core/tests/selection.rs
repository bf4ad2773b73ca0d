use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use adcycle_core::ad::{
    AdDefaults, AdRecord, AdSelector, ChangeDetector, ContactInfo, SelectionError,
    SelectionExpression,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 20, 18, 30, 0).unwrap()
}

fn selector() -> AdSelector {
    AdSelector::new(ChangeDetector::new(Arc::new(AdDefaults::default())))
}

fn ad(title: &str) -> AdRecord {
    AdRecord {
        title: title.into(),
        description: "Works fine, minor scratches.".into(),
        category: "161/176".into(),
        price: Some(40),
        contact: ContactInfo {
            name: Some("Sam".into()),
            ..ContactInfo::default()
        },
        ..AdRecord::default()
    }
}

/// An ad that was published `days` ago and not edited since.
fn published(selector: &AdSelector, title: &str, id: u64, days: i64) -> AdRecord {
    let mut record = ad(title);
    record.id = Some(id);
    record.created_on = Some(now() - Duration::days(days));
    record.updated_on = record.created_on;
    record.content_hash = Some(selector.detector().fingerprint(&record).unwrap());
    record
}

fn select(selector: &AdSelector, ads: &[AdRecord], expression: &str) -> Vec<usize> {
    let expression: SelectionExpression = expression.parse().unwrap();
    selector.select(ads, &expression, now()).selected
}

#[test]
fn overdue_and_changed_ad_is_selected_once() {
    let selector = selector();
    let mut record = published(&selector, "Vintage road bike 56cm", 1001, 30);
    record.description.push_str(" New tyres.");
    assert!(selector.detector().has_changed(&record).unwrap());
    assert!(selector.is_due(&record, now()));

    let ads = vec![record];
    assert_eq!(select(&selector, &ads, "changed,due"), vec![0]);
    assert_eq!(select(&selector, &ads, "changed,due,1001,due"), vec![0]);
}

#[test]
fn keywords_pick_their_own_ads() {
    let selector = selector();
    let ads = vec![
        ad("Brand new ad never sent"),
        published(&selector, "Fresh listing from yesterday", 2, 1),
        published(&selector, "Old listing needing a bump", 3, 9),
        {
            let mut edited = published(&selector, "Edited listing this week", 4, 2);
            edited.price = Some(35);
            edited
        },
    ];
    assert_eq!(select(&selector, &ads, "new"), vec![0]);
    assert_eq!(select(&selector, &ads, "due"), vec![2]);
    assert_eq!(select(&selector, &ads, "changed"), vec![3]);
    assert_eq!(select(&selector, &ads, "2,4"), vec![1, 3]);
    assert_eq!(select(&selector, &ads, "new,due"), vec![0, 2]);
    assert_eq!(select(&selector, &ads, "all"), vec![0, 1, 2, 3]);
}

#[test]
fn new_ads_are_never_changed() {
    let selector = selector();
    let mut fresh = ad("Never published lamp");
    assert_eq!(select(&selector, &[fresh.clone()], "changed"), Vec::<usize>::new());

    fresh.content_hash = Some("0".repeat(64));
    assert_eq!(select(&selector, &[fresh.clone()], "changed"), Vec::<usize>::new());
    assert_eq!(select(&selector, &[fresh], "new,changed"), vec![0]);
}

#[test]
fn due_counts_whole_days() {
    let selector = selector();
    let mut record = published(&selector, "Interval boundary check", 7, 0);
    record.updated_on = Some(now() - Duration::days(7) + Duration::minutes(1));
    assert!(!selector.is_due(&record, now()));
    record.updated_on = Some(now() - Duration::days(7));
    assert!(selector.is_due(&record, now()));

    record.republication_interval = Some(0);
    record.updated_on = Some(now());
    assert!(selector.is_due(&record, now()));
}

#[test]
fn updated_on_wins_over_created_on() {
    let selector = selector();
    let mut record = published(&selector, "Republished recently here", 8, 40);
    record.updated_on = Some(now() - Duration::days(2));
    assert!(!selector.is_due(&record, now()));
}

#[test]
fn unknown_ids_are_reported_not_fatal() {
    let selector = selector();
    let ads = vec![published(&selector, "Only ad in the inventory", 11, 3)];
    let expression: SelectionExpression = "11,12,13".parse().unwrap();
    let outcome = selector.select(&ads, &expression, now());
    assert_eq!(outcome.selected, vec![0]);
    assert_eq!(outcome.unresolved_ids.into_iter().collect::<Vec<_>>(), vec![12, 13]);
}

#[test]
fn invalid_ad_under_changed_is_rejected() {
    let selector = selector();
    let mut broken = ad("Short");
    broken.id = Some(5);
    let ads = vec![broken];
    let expression: SelectionExpression = "changed".parse().unwrap();
    let outcome = selector.select(&ads, &expression, now());
    assert!(outcome.selected.is_empty());
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].index, 0);
}

#[test]
fn malformed_expressions_fail() {
    assert_eq!(
        "due,,new".parse::<SelectionExpression>(),
        Err(SelectionError::EmptyToken { position: 1 })
    );
    assert!(matches!(
        "due,soon".parse::<SelectionExpression>(),
        Err(SelectionError::UnknownToken(token)) if token == "soon"
    ));
    assert_eq!("".parse::<SelectionExpression>(), Err(SelectionError::Empty));
}
