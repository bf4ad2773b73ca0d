use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::ad::{AdType, EffectiveAd, PriceType};
use crate::browser::timeout::keys;
use crate::browser::{OperationKind, PageActor, PageError, RetryExecutor, RetryFailure};
use crate::config::LoginSection;

const CONFIRMATION_MARKER: &str = "p-anzeige-aufgeben-bestaetigung.html?adId=";
const CONFIRMATION_POLL: Duration = Duration::from_millis(500);
const RECAPTCHA_SELECTOR: &str =
    "iframe[name^='a-'][src^='https://www.google.com/recaptcha/api2/anchor?']";
const PRICE_TYPE_SELECTOR: &str =
    "select#price-type-react, select#micro-frontend-price-type, select#priceType";
const PRICE_SELECTOR: &str =
    "input#post-ad-frontend-price, input#micro-frontend-price, input#pstad-price";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub ad_id: u64,
    pub confirmation_url: String,
}

/// Submits one effective ad to the marketplace.
#[async_trait]
pub trait AdPublisher: Send + Sync {
    /// Session setup before the first ad of a run, such as logging in.
    async fn prepare(&self) -> Result<(), RetryFailure> {
        Ok(())
    }

    async fn publish(&self, ad: &EffectiveAd) -> Result<PublishReceipt, RetryFailure>;
}

/// Drives the marketplace forms through a [`PageActor`]. Every page step runs
/// under the [`RetryExecutor`].
pub struct SitePublisher<A> {
    actor: A,
    executor: RetryExecutor,
    base_url: String,
    login: LoginSection,
}

impl<A: PageActor> SitePublisher<A> {
    pub fn new(actor: A, executor: RetryExecutor, base_url: &str, login: LoginSection) -> Self {
        Self {
            actor,
            executor,
            base_url: base_url.trim_end_matches('/').to_string(),
            login,
        }
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    async fn open(&self, path: &str) -> Result<(), RetryFailure> {
        let url = format!("{}{}", self.base_url, path);
        let actor = &self.actor;
        let target = url.as_str();
        self.executor
            .run(keys::PAGE_LOAD, OperationKind::Open, move |_| actor.open(target))
            .await
            .map(|outcome| outcome.result)
    }

    async fn click(&self, selector: &str, key: &str) -> Result<(), RetryFailure> {
        let actor = &self.actor;
        self.executor
            .run(key, OperationKind::Click, move |_| actor.click(selector, key))
            .await
            .map(|outcome| outcome.result)
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), RetryFailure> {
        let actor = &self.actor;
        let key = keys::FORM_INPUT;
        self.executor
            .run(key, OperationKind::Fill, move |_| {
                actor.fill(selector, value, key)
            })
            .await
            .map(|outcome| outcome.result)
    }

    async fn wait_for(&self, selector: &str, key: &str) -> Result<(), RetryFailure> {
        let actor = &self.actor;
        self.executor
            .run(key, OperationKind::Find, move |_| actor.find(selector, key))
            .await
            .map(|outcome| outcome.result)
    }

    /// Presence checks are bounded by the actor's own wait and never retried.
    async fn probe(&self, selector: &str, key: &str) -> Result<bool, RetryFailure> {
        if self.executor.cancellation_token().is_cancelled() {
            return Err(RetryFailure::new(key, 0, PageError::Cancelled));
        }
        self.actor
            .probe(selector, key)
            .await
            .map_err(|err| RetryFailure::new(key, 1, err))
    }

    async fn read_text(&self, selector: &str, key: &str) -> Result<String, RetryFailure> {
        let actor = &self.actor;
        self.executor
            .run(key, OperationKind::ReadText, move |_| {
                actor.read_text(selector, key)
            })
            .await
            .map(|outcome| outcome.result)
    }

    async fn is_logged_in(&self) -> Result<bool, RetryFailure> {
        if !self.probe("#user-email", keys::LOGIN_DETECTION).await? {
            return Ok(false);
        }
        let user_info = self.read_text("#user-email", keys::QUICK_DOM).await?;
        Ok(user_info.contains(self.login.username.trim()))
    }

    pub async fn login(&self) -> Result<(), RetryFailure> {
        if self.login.username.trim().is_empty() {
            return Err(RetryFailure::new(
                "login",
                0,
                PageError::Configuration("login.username is not configured".into()),
            ));
        }
        self.open("/").await?;
        if self.is_logged_in().await? {
            info!(user = %self.login.username, "already logged in");
            return Ok(());
        }
        info!(user = %self.login.username, "logging in");
        self.open("/m-einloggen.html?targetUrl=/").await?;
        self.fill("#email", &self.login.username).await?;
        self.fill("#password", &self.login.password).await?;
        self.click("form#login-form button[type='submit']", keys::DEFAULT)
            .await?;

        if self.probe("#gdpr-banner-accept", keys::QUICK_DOM).await? {
            debug!("dismissing consent banner");
            self.click("#gdpr-banner-cmp-button", keys::QUICK_DOM).await?;
            if self
                .probe("#ConsentManagementPage button.Button-secondary", keys::QUICK_DOM)
                .await?
            {
                self.click(
                    "#ConsentManagementPage button.Button-secondary",
                    keys::QUICK_DOM,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn set_category(&self, category: &str) -> Result<(), RetryFailure> {
        self.click("#pstad-lnk-chngeCtgry", keys::DEFAULT).await?;
        self.wait_for("#postad-step1-sbmt", keys::DEFAULT).await?;
        self.open(&format!("/p-kategorie-aendern.html#?path={category}"))
            .await?;
        self.click("#postad-step1-sbmt button", keys::DEFAULT).await
    }

    async fn set_price(&self, ad: &EffectiveAd) -> Result<(), RetryFailure> {
        if ad.price_type == PriceType::NotApplicable {
            return Ok(());
        }
        if self.probe(PRICE_TYPE_SELECTOR, keys::QUICK_DOM).await? {
            self.fill(PRICE_TYPE_SELECTOR, ad.price_type.as_str())
                .await?;
        }
        if let Some(price) = ad.price {
            self.fill(PRICE_SELECTOR, &price.to_string()).await?;
        }
        Ok(())
    }

    async fn set_contact(&self, ad: &EffectiveAd) -> Result<(), RetryFailure> {
        let fields = [
            ("#pstad-zip", &ad.contact.zipcode),
            ("#pstad-street", &ad.contact.street),
            ("#postad-contactname", &ad.contact.name),
            ("#postad-phonenumber", &ad.contact.phone),
        ];
        for (selector, value) in fields {
            let Some(value) = value.as_deref() else {
                continue;
            };
            if self.probe(selector, keys::QUICK_DOM).await? {
                self.fill(selector, value).await?;
            } else {
                debug!(selector, "contact field not offered by form");
            }
        }
        Ok(())
    }

    async fn await_confirmation(&self) -> Result<String, RetryFailure> {
        let actor = &self.actor;
        self.executor
            .run(
                keys::PUBLISHING_CONFIRMATION,
                OperationKind::CurrentUrl,
                move |_| async move {
                    loop {
                        let url = actor.current_url().await?;
                        if url.contains(CONFIRMATION_MARKER) {
                            return Ok(url);
                        }
                        sleep(CONFIRMATION_POLL).await;
                    }
                },
            )
            .await
            .map(|outcome| outcome.result)
    }
}

/// Extracts the numeric `adId` query parameter of the confirmation page.
pub fn parse_confirmation(url: &str) -> Result<u64, PageError> {
    let parsed = Url::parse(url).map_err(|err| PageError::Unconfirmed(format!("{url}: {err}")))?;
    parsed
        .query_pairs()
        .find(|(name, _)| name == "adId")
        .and_then(|(_, value)| value.parse::<u64>().ok())
        .ok_or_else(|| PageError::Unconfirmed(format!("no adId in {url}")))
}

#[async_trait]
impl<A: PageActor> AdPublisher for SitePublisher<A> {
    async fn prepare(&self) -> Result<(), RetryFailure> {
        self.login().await
    }

    async fn publish(&self, ad: &EffectiveAd) -> Result<PublishReceipt, RetryFailure> {
        self.open("/p-anzeige-aufgeben-schritt2.html").await?;
        if ad.ad_type == AdType::Wanted {
            self.click("#adType2", keys::FORM_INPUT).await?;
        }
        self.fill("#postad-title", &ad.title).await?;
        self.set_category(&ad.category).await?;
        for (name, value) in &ad.special_attributes {
            let selector = format!("[id='{}']", name.replace('\'', "\\'"));
            self.fill(&selector, value).await?;
        }
        self.set_price(ad).await?;
        self.fill("#pstad-descrptn", &ad.description).await?;
        self.set_contact(ad).await?;

        if self.probe(RECAPTCHA_SELECTOR, keys::CAPTCHA_DETECTION).await? {
            warn!(title = %ad.title, "captcha present on publish form");
            return Err(RetryFailure::new(
                keys::CAPTCHA_DETECTION,
                1,
                PageError::Captcha {
                    url: format!("{}/p-anzeige-aufgeben-schritt2.html", self.base_url),
                },
            ));
        }

        self.click("#pstad-submit", keys::PUBLISHING_RESULT).await?;
        let confirmation_url = self.await_confirmation().await?;
        let ad_id = parse_confirmation(&confirmation_url)
            .map_err(|err| RetryFailure::new(keys::PUBLISHING_CONFIRMATION, 1, err))?;
        info!(ad_id, title = %ad.title, "ad published");
        Ok(PublishReceipt {
            ad_id,
            confirmation_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_url_yields_ad_id() {
        let url = "https://www.kleinanzeigen.de/p-anzeige-aufgeben-bestaetigung.html?adId=2871234567&uuid=x";
        assert_eq!(parse_confirmation(url).unwrap(), 2_871_234_567);
        assert!(matches!(
            parse_confirmation("https://www.kleinanzeigen.de/p-anzeige-aufgeben-bestaetigung.html"),
            Err(PageError::Unconfirmed(_))
        ));
        assert!(parse_confirmation("not a url").is_err());
    }
}
