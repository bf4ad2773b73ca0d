use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::AdResult;
use super::models::{AdDefaults, AdRecord, EffectiveAd};

/// Canonical hash input. Fields are declared in key order so the encoded JSON
/// is key-sorted without relying on map ordering.
#[derive(Serialize)]
struct FingerprintContent<'a> {
    active: bool,
    category: &'a str,
    contact: ContactContent<'a>,
    description: &'a str,
    images: Vec<String>,
    price: String,
    price_type: &'static str,
    sell_directly: bool,
    shipping_costs: String,
    shipping_options: Vec<&'a str>,
    shipping_type: &'static str,
    special_attributes: BTreeMap<&'a str, &'a str>,
    title: &'a str,
    #[serde(rename = "type")]
    ad_type: &'static str,
}

#[derive(Serialize)]
struct ContactContent<'a> {
    location: &'a str,
    name: &'a str,
    phone: &'a str,
    street: &'a str,
    zipcode: &'a str,
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or_default()
}

pub fn fingerprint_effective(ad: &EffectiveAd) -> AdResult<String> {
    let mut images: Vec<String> = ad
        .images
        .iter()
        .map(|image| {
            Path::new(image.trim())
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    images.sort();
    let mut shipping_options: Vec<&str> = ad.shipping_options.iter().map(|o| o.trim()).collect();
    shipping_options.sort_unstable();

    let content = FingerprintContent {
        active: ad.active,
        category: ad.category.trim(),
        contact: ContactContent {
            location: text(&ad.contact.location),
            name: text(&ad.contact.name),
            phone: text(&ad.contact.phone),
            street: text(&ad.contact.street),
            zipcode: text(&ad.contact.zipcode),
        },
        description: ad.description.trim(),
        images,
        price: ad.price.map(|price| price.to_string()).unwrap_or_default(),
        price_type: ad.price_type.as_str(),
        sell_directly: ad.sell_directly,
        shipping_costs: ad
            .shipping_costs
            .map(|costs| format!("{costs:.2}"))
            .unwrap_or_default(),
        shipping_options,
        shipping_type: ad.shipping_type.as_str(),
        special_attributes: ad
            .special_attributes
            .iter()
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect(),
        title: ad.title.trim(),
        ad_type: ad.ad_type.as_str(),
    };
    let encoded = serde_json::to_vec(&content)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

pub fn fingerprint(ad: &AdRecord, defaults: &AdDefaults) -> AdResult<String> {
    fingerprint_effective(&EffectiveAd::merge(ad, defaults)?)
}

/// Compares an ad's effective content against the hash stored at its last
/// confirmed publish.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    defaults: Arc<AdDefaults>,
}

impl ChangeDetector {
    pub fn new(defaults: Arc<AdDefaults>) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &AdDefaults {
        &self.defaults
    }

    pub fn fingerprint(&self, ad: &AdRecord) -> AdResult<String> {
        fingerprint(ad, &self.defaults)
    }

    /// Ads without an id are `new`, never changed. A published ad without a
    /// stored hash counts as changed.
    pub fn has_changed(&self, ad: &AdRecord) -> AdResult<bool> {
        if ad.id.is_none() {
            return Ok(false);
        }
        let Some(stored) = ad.content_hash.as_deref() else {
            return Ok(true);
        };
        Ok(self.fingerprint(ad)? != stored)
    }
}
