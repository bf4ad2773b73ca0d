use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{AdError, AdResult};
use crate::timestamp;

pub const MAX_DESCRIPTION_LENGTH: usize = 4000;
pub const MIN_TITLE_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdType {
    #[default]
    #[serde(alias = "offer")]
    Offer,
    #[serde(alias = "wanted")]
    Wanted,
}

impl AdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Offer => "OFFER",
            AdType::Wanted => "WANTED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    #[serde(alias = "fixed")]
    Fixed,
    #[default]
    #[serde(alias = "negotiable")]
    Negotiable,
    #[serde(alias = "give_away")]
    GiveAway,
    #[serde(alias = "not_applicable")]
    NotApplicable,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceType::Fixed => "FIXED",
            PriceType::Negotiable => "NEGOTIABLE",
            PriceType::GiveAway => "GIVE_AWAY",
            PriceType::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingType {
    #[serde(alias = "pickup")]
    Pickup,
    #[default]
    #[serde(alias = "shipping")]
    Shipping,
    #[serde(alias = "not_applicable")]
    NotApplicable,
}

impl ShippingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingType::Pickup => "PICKUP",
            ShippingType::Shipping => "SHIPPING",
            ShippingType::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReductionStrategy {
    #[serde(alias = "percentage")]
    Percentage,
    #[serde(alias = "fixed")]
    Fixed,
}

impl ReductionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionStrategy::Percentage => "PERCENTAGE",
            ReductionStrategy::Fixed => "FIXED",
        }
    }
}

/// Contact block. Zip codes and phone numbers are often written as bare
/// numbers in YAML, so every field accepts numbers as well as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    #[serde(
        deserialize_with = "lenient::option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(
        deserialize_with = "lenient::option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub street: Option<String>,
    #[serde(
        deserialize_with = "lenient::option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub zipcode: Option<String>,
    #[serde(
        deserialize_with = "lenient::option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,
    #[serde(
        deserialize_with = "lenient::option_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone: Option<String>,
}

impl ContactInfo {
    /// Field-by-field overlay: values set here win over `base`.
    pub fn overlay(&self, base: &ContactInfo) -> ContactInfo {
        ContactInfo {
            name: pick(&self.name, &base.name),
            street: pick(&self.street, &base.street),
            zipcode: pick(&self.zipcode, &base.zipcode),
            location: pick(&self.location, &base.location),
            phone: pick(&self.phone, &base.phone),
        }
    }

    fn is_empty(&self) -> bool {
        *self == ContactInfo::default()
    }
}

/// Price reduction block as written in a document. Every field is optional so
/// an ad can override a single value and inherit the rest from the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceReductionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ReductionStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_reposts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_days: Option<u32>,
}

impl PriceReductionSettings {
    pub fn overlay(&self, base: &PriceReductionSettings) -> PriceReductionSettings {
        PriceReductionSettings {
            enabled: self.enabled.or(base.enabled),
            strategy: self.strategy.or(base.strategy),
            amount: self.amount.or(base.amount),
            min_price: self.min_price.or(base.min_price),
            delay_reposts: self.delay_reposts.or(base.delay_reposts),
            delay_days: self.delay_days.or(base.delay_days),
        }
    }

    pub fn resolve(&self) -> AdResult<PriceReductionConfig> {
        let enabled = self.enabled.unwrap_or(false);
        let delay_reposts = self.delay_reposts.unwrap_or(0);
        let delay_days = self.delay_days.unwrap_or(0);
        if !enabled {
            return Ok(PriceReductionConfig {
                enabled,
                strategy: self.strategy.unwrap_or(ReductionStrategy::Percentage),
                amount: self.amount.unwrap_or(0.0),
                min_price: self.min_price,
                delay_reposts,
                delay_days,
            });
        }
        let strategy = self.strategy.ok_or_else(|| {
            AdError::invalid(
                "price_reduction.strategy",
                "required when price reduction is enabled",
            )
        })?;
        let amount = self.amount.ok_or_else(|| {
            AdError::invalid(
                "price_reduction.amount",
                "required when price reduction is enabled",
            )
        })?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AdError::invalid(
                "price_reduction.amount",
                format!("must be a positive number, got {amount}"),
            ));
        }
        if strategy == ReductionStrategy::Percentage && amount > 100.0 {
            return Err(AdError::invalid(
                "price_reduction.amount",
                format!("percentage must not exceed 100, got {amount}"),
            ));
        }
        Ok(PriceReductionConfig {
            enabled,
            strategy,
            amount,
            min_price: self.min_price,
            delay_reposts,
            delay_days,
        })
    }

    fn is_unset(&self) -> bool {
        *self == PriceReductionSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceReductionConfig {
    pub enabled: bool,
    pub strategy: ReductionStrategy,
    pub amount: f64,
    pub min_price: Option<u64>,
    pub delay_reposts: u32,
    pub delay_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdDefaults {
    pub active: bool,
    #[serde(rename = "type")]
    pub ad_type: AdType,
    pub description_prefix: Option<String>,
    pub description_suffix: Option<String>,
    pub price_type: PriceType,
    pub shipping_type: ShippingType,
    pub sell_directly: bool,
    pub contact: ContactInfo,
    pub republication_interval: u32,
    pub price_reduction: PriceReductionSettings,
}

impl Default for AdDefaults {
    fn default() -> Self {
        Self {
            active: true,
            ad_type: AdType::Offer,
            description_prefix: None,
            description_suffix: None,
            price_type: PriceType::Negotiable,
            shipping_type: ShippingType::Shipping,
            sell_directly: false,
            contact: ContactInfo::default(),
            republication_interval: 7,
            price_reduction: PriceReductionSettings::default(),
        }
    }
}

/// One ad document plus its publication state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ad_type: Option<AdType>,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_suffix: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(
        deserialize_with = "lenient::string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub special_attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_type: Option<PriceType>,
    #[serde(
        alias = "auto_price_reduction",
        skip_serializing_if = "PriceReductionSettings::is_unset"
    )]
    pub price_reduction: PriceReductionSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_type: Option<ShippingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_costs: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shipping_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_directly: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "ContactInfo::is_empty")]
    pub contact: ContactInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub republication_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub repost_count: u32,
}

impl AdRecord {
    pub fn is_active(&self, defaults: &AdDefaults) -> bool {
        self.active.unwrap_or(defaults.active)
    }

    pub fn last_published_at(&self) -> Option<DateTime<Utc>> {
        self.updated_on.or(self.created_on)
    }

    pub fn republication_interval(&self, defaults: &AdDefaults) -> u32 {
        self.republication_interval
            .unwrap_or(defaults.republication_interval)
    }

    pub fn price_reduction(&self, defaults: &AdDefaults) -> AdResult<PriceReductionConfig> {
        self.price_reduction
            .overlay(&defaults.price_reduction)
            .resolve()
    }
}

/// The ad after defaults have been merged in. Used for fingerprinting and
/// publishing alike.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveAd {
    pub id: Option<u64>,
    pub active: bool,
    pub ad_type: AdType,
    pub title: String,
    pub description: String,
    pub category: String,
    pub special_attributes: BTreeMap<String, String>,
    pub price: Option<u64>,
    pub price_type: PriceType,
    pub shipping_type: ShippingType,
    pub shipping_costs: Option<f64>,
    pub shipping_options: Vec<String>,
    pub sell_directly: bool,
    pub images: Vec<String>,
    pub contact: ContactInfo,
    pub republication_interval: u32,
    pub price_reduction: PriceReductionConfig,
}

impl EffectiveAd {
    pub fn merge(record: &AdRecord, defaults: &AdDefaults) -> AdResult<EffectiveAd> {
        let title = record.title.trim().to_string();
        if title.chars().count() < MIN_TITLE_LENGTH {
            return Err(AdError::invalid(
                "title",
                format!("must be at least {MIN_TITLE_LENGTH} characters"),
            ));
        }
        if record.description.trim().is_empty() {
            return Err(AdError::invalid("description", "must not be empty"));
        }
        let category = record.category.trim().to_string();
        if category.is_empty() {
            return Err(AdError::invalid("category", "must not be empty"));
        }

        let prefix = pick(&record.description_prefix, &defaults.description_prefix);
        let suffix = pick(&record.description_suffix, &defaults.description_suffix);
        let description = format!(
            "{}{}{}",
            prefix.unwrap_or_default(),
            record.description,
            suffix.unwrap_or_default()
        )
        .replace('@', "(at)");
        let length = description.chars().count();
        if length > MAX_DESCRIPTION_LENGTH {
            return Err(AdError::invalid(
                "description",
                format!("length {length} exceeds {MAX_DESCRIPTION_LENGTH} characters"),
            ));
        }

        let price_type = record.price_type.unwrap_or(defaults.price_type);
        match (price_type, record.price) {
            (PriceType::GiveAway, Some(_)) => {
                return Err(AdError::invalid(
                    "price",
                    "must not be set when price_type is GIVE_AWAY",
                ));
            }
            (PriceType::Fixed, None) => {
                return Err(AdError::invalid(
                    "price",
                    "is required when price_type is FIXED",
                ));
            }
            _ => {}
        }

        if let Some(costs) = record.shipping_costs {
            if !costs.is_finite() || costs < 0.0 {
                return Err(AdError::invalid(
                    "shipping_costs",
                    format!("must be a non-negative amount, got {costs}"),
                ));
            }
        }

        let contact = record.contact.overlay(&defaults.contact);
        if contact.name.is_none() {
            return Err(AdError::invalid("contact.name", "must not be empty"));
        }

        let price_reduction = record.price_reduction(defaults)?;
        if price_reduction.enabled {
            let Some(price) = record.price else {
                return Err(AdError::invalid(
                    "price",
                    "is required when price reduction is enabled",
                ));
            };
            if let Some(min_price) = price_reduction.min_price {
                if min_price > price {
                    return Err(AdError::invalid(
                        "price_reduction.min_price",
                        format!("{min_price} is greater than price {price}"),
                    ));
                }
            }
        }

        Ok(EffectiveAd {
            id: record.id,
            active: record.is_active(defaults),
            ad_type: record.ad_type.unwrap_or(defaults.ad_type),
            title,
            description,
            category,
            special_attributes: record
                .special_attributes
                .iter()
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .collect(),
            price: record.price,
            price_type,
            shipping_type: record.shipping_type.unwrap_or(defaults.shipping_type),
            shipping_costs: record.shipping_costs,
            shipping_options: record.shipping_options.clone(),
            sell_directly: record.sell_directly.unwrap_or(defaults.sell_directly),
            images: record.images.clone(),
            contact,
            republication_interval: record.republication_interval(defaults),
            price_reduction,
        })
    }
}

/// An ad record together with the file it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct AdEntry {
    pub path: PathBuf,
    pub record: AdRecord,
}

impl AdEntry {
    pub fn new(path: impl Into<PathBuf>, record: AdRecord) -> Self {
        Self {
            path: path.into(),
            record,
        }
    }

    pub fn label(&self) -> String {
        let file = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        match self.record.id {
            Some(id) => format!("{file} (#{id})"),
            None => file,
        }
    }
}

impl AsRef<AdRecord> for AdEntry {
    fn as_ref(&self) -> &AdRecord {
        &self.record
    }
}

impl AsRef<AdRecord> for AdRecord {
    fn as_ref(&self) -> &AdRecord {
        self
    }
}

/// Empty or whitespace-only strings count as unset.
fn pick(value: &Option<String>, fallback: &Option<String>) -> Option<String> {
    [value, fallback]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .cloned()
}

mod lenient {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Integer(i64),
        Float(f64),
        Bool(bool),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Text(text) => text,
                Scalar::Integer(value) => value.to_string(),
                Scalar::Float(value) => value.to_string(),
                Scalar::Bool(value) => value.to_string(),
            }
        }
    }

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Scalar::deserialize(deserializer).map(Scalar::into_string)
    }

    pub fn option_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Scalar> = Option::deserialize(deserializer)?;
        Ok(raw
            .map(Scalar::into_string)
            .filter(|text| !text.trim().is_empty()))
    }

    pub fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<BTreeMap<String, Scalar>> = Option::deserialize(deserializer)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.into_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AdRecord {
        AdRecord {
            title: "Vintage oak desk".into(),
            description: "Solid wood, minor scratches".into(),
            category: "80/83".into(),
            price: Some(150),
            contact: ContactInfo {
                name: Some("Sam".into()),
                ..ContactInfo::default()
            },
            ..AdRecord::default()
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let mut defaults = AdDefaults::default();
        defaults.description_suffix = Some("\nContact: me@example.com".into());
        defaults.contact.zipcode = Some("10115".into());
        let mut ad = record();
        ad.description_prefix = Some("   ".into());

        let effective = EffectiveAd::merge(&ad, &defaults).unwrap();
        assert_eq!(effective.price_type, PriceType::Negotiable);
        assert_eq!(effective.republication_interval, 7);
        assert!(effective.description.ends_with("me(at)example.com"));
        assert!(effective.description.starts_with("Solid wood"));
        assert_eq!(effective.contact.zipcode.as_deref(), Some("10115"));
        assert_eq!(effective.contact.name.as_deref(), Some("Sam"));
    }

    #[test]
    fn short_title_is_rejected() {
        let mut ad = record();
        ad.title = "Desk".into();
        let err = EffectiveAd::merge(&ad, &AdDefaults::default()).unwrap_err();
        assert!(matches!(err, AdError::Invalid { ref field, .. } if field == "title"));
    }

    #[test]
    fn give_away_with_price_is_rejected() {
        let mut ad = record();
        ad.price_type = Some(PriceType::GiveAway);
        assert!(EffectiveAd::merge(&ad, &AdDefaults::default()).is_err());
        ad.price = None;
        assert!(EffectiveAd::merge(&ad, &AdDefaults::default()).is_ok());
    }

    #[test]
    fn floor_above_price_is_rejected() {
        let mut ad = record();
        ad.price_reduction = PriceReductionSettings {
            enabled: Some(true),
            strategy: Some(ReductionStrategy::Fixed),
            amount: Some(10.0),
            min_price: Some(200),
            ..PriceReductionSettings::default()
        };
        let err = EffectiveAd::merge(&ad, &AdDefaults::default()).unwrap_err();
        assert!(
            matches!(err, AdError::Invalid { ref field, .. } if field == "price_reduction.min_price")
        );
    }

    #[test]
    fn reduction_settings_inherit_from_defaults() {
        let mut defaults = AdDefaults::default();
        defaults.price_reduction = PriceReductionSettings {
            enabled: Some(true),
            strategy: Some(ReductionStrategy::Percentage),
            amount: Some(10.0),
            min_price: Some(50),
            delay_reposts: Some(1),
            delay_days: None,
        };
        let mut ad = record();
        ad.price_reduction.min_price = Some(90);

        let config = ad.price_reduction(&defaults).unwrap();
        assert!(config.enabled);
        assert_eq!(config.min_price, Some(90));
        assert_eq!(config.delay_reposts, 1);
        assert_eq!(config.delay_days, 0);
    }

    #[test]
    fn enabled_reduction_requires_strategy_and_amount() {
        let settings = PriceReductionSettings {
            enabled: Some(true),
            ..PriceReductionSettings::default()
        };
        assert!(settings.resolve().is_err());
        let settings = PriceReductionSettings {
            enabled: Some(true),
            strategy: Some(ReductionStrategy::Percentage),
            amount: Some(120.0),
            ..PriceReductionSettings::default()
        };
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn yaml_document_accepts_numeric_contact_fields() {
        let yaml = "title: Vintage oak desk\n\
                    description: Solid wood\n\
                    category: 80/83\n\
                    type: wanted\n\
                    price: 150\n\
                    contact:\n  name: Sam\n  zipcode: 10115\n\
                    special_attributes:\n  condition_s: 3\n\
                    created_on: 2024-12-25T08:30:00\n";
        let record: AdRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.ad_type, Some(AdType::Wanted));
        assert_eq!(record.contact.zipcode.as_deref(), Some("10115"));
        assert_eq!(
            record.special_attributes.get("condition_s").map(String::as_str),
            Some("3")
        );
        assert!(record.created_on.is_some());
        assert_eq!(record.repost_count, 0);
    }
}
