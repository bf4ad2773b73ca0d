use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use adcycle_core::ad::{FileStore, PriceType, Store};
use adcycle_core::config::UpdateCheckSection;
use adcycle_core::update_check::{
    ProbeError, ReleaseProbe, UpdateCheckOutcome, UpdateCheckState, UpdateChecker,
};

const DESK: &str = r#"
title: Solid oak writing desk
description: Lightly used, pickup only.
category: 80001
price: 120
price_type: fixed
special_attributes:
  condition_s: ok
  size: 140
contact:
  name: Jo
  zipcode: 10115
repost_count: 2
id: 2876543210
created_on: "2025-01-04T10:00:00"
"#;

fn setup() -> (tempfile::TempDir, FileStore) {
    let dir = tempfile::tempdir().unwrap();
    let ads = dir.path().join("ads");
    fs::create_dir_all(ads.join("furniture")).unwrap();
    fs::write(ads.join("furniture").join("ad_desk.yaml"), DESK).unwrap();
    fs::write(
        ads.join("ad_lamp.json"),
        r#"{"title": "Mid-century floor lamp", "description": "Works.", "category": "80/87", "price": 45}"#,
    )
    .unwrap();
    fs::write(ads.join("ad_broken.yaml"), "title: [unterminated").unwrap();
    fs::write(ads.join("notes.yaml"), "not: an ad").unwrap();
    let store = FileStore::new(ads, dir.path().join(".temp").join("update_check_state.json"));
    (dir, store)
}

#[test]
fn loads_ads_recursively_and_reports_broken_files() {
    let (_dir, store) = setup();
    let inventory = store.load_ads().unwrap();
    let names: Vec<String> = inventory
        .entries
        .iter()
        .map(|entry| entry.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["ad_lamp.json", "ad_desk.yaml"]);
    assert_eq!(inventory.issues.len(), 1);
    assert!(inventory.issues[0].path.ends_with("ad_broken.yaml"));

    let desk = &inventory.entries[1].record;
    assert_eq!(desk.price_type, Some(PriceType::Fixed));
    assert_eq!(desk.special_attributes.get("size").map(String::as_str), Some("140"));
    assert_eq!(desk.contact.zipcode.as_deref(), Some("10115"));
    assert_eq!(
        desk.created_on,
        Some(Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap())
    );
}

#[test]
fn persisted_ad_reloads_identically() {
    let (_dir, store) = setup();
    let mut inventory = store.load_ads().unwrap();
    let entry = &mut inventory.entries[1];
    entry.record.repost_count = 3;
    entry.record.price = Some(108);
    entry.record.updated_on = Some(Utc.with_ymd_and_hms(2025, 2, 1, 7, 30, 0).unwrap());
    entry.record.content_hash = Some("ab".repeat(32));
    store.persist_ad(entry).unwrap();

    let written = fs::read_to_string(&entry.path).unwrap();
    assert!(written.contains("2025-02-01T07:30:00.000000Z"));

    let reloaded = store.load_ads().unwrap();
    assert_eq!(reloaded.entries[1], *entry);
}

#[test]
fn json_ads_stay_json() {
    let (_dir, store) = setup();
    let inventory = store.load_ads().unwrap();
    let mut lamp = inventory.entries[0].clone();
    lamp.record.id = Some(17);
    store.persist_ad(&lamp).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&lamp.path).unwrap()).unwrap();
    assert_eq!(value["id"], 17);
    assert_eq!(value["title"], "Mid-century floor lamp");
}

#[test]
fn update_state_survives_corruption() {
    let (_dir, store) = setup();
    assert_eq!(store.load_update_check_state(), UpdateCheckState::default());

    let mut state = UpdateCheckState::default();
    state.record_check(Utc.with_ymd_and_hms(2025, 3, 3, 3, 3, 3).unwrap());
    store.save_update_check_state(&state).unwrap();
    assert_eq!(store.load_update_check_state(), state);

    fs::write(store.state_file(), "{garbage").unwrap();
    assert_eq!(store.load_update_check_state(), UpdateCheckState::default());
}

struct FixedProbe(Result<bool, &'static str>);

#[async_trait::async_trait]
impl ReleaseProbe for FixedProbe {
    async fn update_available(&self) -> Result<bool, ProbeError> {
        self.0.map_err(|message| ProbeError(message.to_string()))
    }
}

#[tokio::test]
async fn update_checker_records_successful_checks_only() {
    let (_dir, store) = setup();
    let store = Arc::new(store);
    let checker = UpdateChecker::new(
        UpdateCheckSection {
            enabled: true,
            interval: "7d".into(),
        },
        store.clone(),
    );
    let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();

    let failed = checker.check(&FixedProbe(Err("offline")), now, false).await;
    assert!(matches!(failed, UpdateCheckOutcome::Failed { .. }));
    assert_eq!(store.load_update_check_state().last_check, None);

    let outcome = checker.check(&FixedProbe(Ok(true)), now, false).await;
    assert_eq!(outcome, UpdateCheckOutcome::UpdateAvailable);
    assert_eq!(store.load_update_check_state().last_check, Some(now));

    let later = now + chrono::Duration::days(3);
    assert_eq!(
        checker.check(&FixedProbe(Ok(true)), later, false).await,
        UpdateCheckOutcome::NotDue {
            last_check: Some(now)
        }
    );
    assert_eq!(
        checker.check(&FixedProbe(Ok(false)), later, true).await,
        UpdateCheckOutcome::UpToDate
    );
}

#[test]
fn checker_reports_due_from_stored_state() {
    let (_dir, store) = setup();
    let store = Arc::new(store);
    let settings = UpdateCheckSection {
        enabled: true,
        interval: "1d".into(),
    };
    let checker = UpdateChecker::new(settings.clone(), store.clone());
    let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
    assert!(checker.is_due(&checker.state(), now));

    let mut state = UpdateCheckState::default();
    state.record_check(now - chrono::Duration::hours(2));
    store.save_update_check_state(&state).unwrap();
    assert!(!checker.is_due(&checker.state(), now));
    assert!(checker.is_due(&checker.state(), now + chrono::Duration::days(1)));

    let disabled = UpdateChecker::new(
        UpdateCheckSection {
            enabled: false,
            ..settings
        },
        store,
    );
    assert!(!disabled.is_due(&UpdateCheckState::default(), now));
}
