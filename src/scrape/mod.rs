//! Marketplace product scrapers.
//!
//! Every marketplace is reduced to the same [`ProductInfo`] shape. Fetching and
//! parsing are split so the parsers can be exercised against captured pages.

pub mod ozon;
pub mod wildberries;
pub mod yandex;

use crate::config::ScraperConfig;
use crate::http::build_client;
use crate::marketplace::{self, Marketplace};
use crate::money::Money;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{ops::RangeInclusive, sync::Arc, time::Duration};
use thiserror::Error;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductInfo {
    pub marketplace: Marketplace,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub price: Money,
    pub currency: String,
    pub image_url: Option<String>,
    pub url: String,
    pub brand: Option<String>,
    #[serde(default)]
    pub available_sizes: Vec<SizeOption>,
}

impl ProductInfo {
    pub fn size(&self, wanted: &str) -> Option<&SizeOption> {
        let wanted = wanted.trim();
        self.available_sizes.iter().find(|size| size.matches(wanted))
    }

    pub fn colors_for(&self, size: &str) -> &[String] {
        self.size(size)
            .map(|size| size.colors.as_slice())
            .unwrap_or(&[])
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizeOption {
    pub name: String,
    pub orig_name: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

impl SizeOption {
    pub fn matches(&self, wanted: &str) -> bool {
        self.name == wanted || self.orig_name.as_deref() == Some(wanted)
    }

    pub fn label(&self) -> String {
        match &self.orig_name {
            Some(orig) if !orig.is_empty() && orig != &self.name => {
                format!("{} ({orig})", self.name)
            }
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("not a supported marketplace link")]
    UnsupportedUrl,
    #[error("{0} is temporarily not supported")]
    Unsupported(Marketplace),
    #[error("product id not found in url")]
    MissingProductId,
    #[error("product not found")]
    NotFound,
    #[error("marketplace asked for a captcha")]
    Captcha,
    #[error("marketplace responded with HTTP {0}")]
    Http(u16),
    #[error("request failed: {0}")]
    Network(String),
    #[error("product page has no price")]
    MissingPrice,
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl ScrapeError {
    /// Errors worth telling the user to simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Captcha
                | ScrapeError::Network(_)
                | ScrapeError::RetriesExhausted { .. }
                | ScrapeError::Http(_)
        )
    }
}

/// Anything that can turn a pasted link into product data.
#[allow(async_fn_in_trait)]
pub trait ProductSource {
    async fn fetch_product(&self, text: &str) -> Result<ProductInfo, ScrapeError>;
}

#[derive(Clone)]
pub struct Scraper {
    http: Client,
    config: Arc<ScraperConfig>,
}

impl Scraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            http: build_client(),
            config: Arc::new(config),
        }
    }
}

impl ProductSource for Scraper {
    async fn fetch_product(&self, text: &str) -> Result<ProductInfo, ScrapeError> {
        let url = marketplace::extract_url(text).unwrap_or_else(|| text.trim());
        let marketplace = marketplace::identify(url).ok_or(ScrapeError::UnsupportedUrl)?;
        match marketplace {
            Marketplace::Wildberries => wildberries::fetch(&self.http, &self.config, url).await,
            Marketplace::Ozon => ozon::fetch(url).await,
            Marketplace::YandexMarket => yandex::fetch(&self.http, &self.config, url).await,
        }
    }
}

pub(crate) fn random_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Uniformly jittered delay in seconds, scaled by the configured backoff.
pub(crate) fn jittered_delay(config: &ScraperConfig, range: RangeInclusive<f64>) -> Duration {
    let seconds = rand::rng().random_range(range);
    config.scaled(seconds)
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
