use super::{ProductInfo, ScrapeError, SizeOption, jittered_delay, pause, random_user_agent};
use crate::config::ScraperConfig;
use crate::marketplace::Marketplace;
use crate::money::Money;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url, header};
use serde::Deserialize;
use tracing::{debug, warn};

static NM_ID_IN_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/catalog/(\d+)/detail").expect("static nm id regex"));

// Destination region the storefront uses for Moscow pricing.
const CARD_DEST: &str = "-1257786";

#[derive(Debug, Deserialize)]
pub struct CardResponse {
    #[serde(default)]
    pub data: Option<CardData>,
}

#[derive(Debug, Deserialize)]
pub struct CardData {
    #[serde(default)]
    pub products: Vec<CardProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProduct {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price_u: Option<i64>,
    #[serde(default)]
    pub sale_price_u: Option<i64>,
    #[serde(default)]
    pub sizes: Vec<CardSize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSize {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub orig_name: Option<String>,
    #[serde(default)]
    pub colors: Vec<CardColor>,
}

#[derive(Debug, Deserialize)]
pub struct CardColor {
    #[serde(default)]
    pub name: Option<String>,
}

pub fn extract_nm_id(url: &str) -> Option<String> {
    if let Some(captures) = NM_ID_IN_PATH.captures(url) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "catalog" && is_numeric(pair[1]))
        .map(|pair| pair[1].to_string())
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn card_url(config: &ScraperConfig, nm_id: &str) -> String {
    format!(
        "{}/cards/detail?nm={nm_id}&appType=1&curr=rub&dest={CARD_DEST}",
        config.wb_card_api_base
    )
}

pub async fn fetch(
    http: &Client,
    config: &ScraperConfig,
    url: &str,
) -> Result<ProductInfo, ScrapeError> {
    let nm_id = extract_nm_id(url).ok_or(ScrapeError::MissingProductId)?;
    let card = fetch_card(http, config, &nm_id).await?;
    parse_card(card, url)
}

async fn fetch_card(
    http: &Client,
    config: &ScraperConfig,
    nm_id: &str,
) -> Result<CardResponse, ScrapeError> {
    let endpoint = card_url(config, nm_id);
    let attempts = config.max_retries.max(1);
    for attempt in 1..=attempts {
        let user_agent = random_user_agent();
        debug!(target = "marketbot.scrape", %endpoint, attempt, "wb_card_request");
        let response = http
            .get(&endpoint)
            .header(header::USER_AGENT, user_agent)
            .header(header::ACCEPT, "application/json")
            .header(header::ORIGIN, "https://www.wildberries.ru")
            .header(
                header::REFERER,
                format!("https://www.wildberries.ru/catalog/{nm_id}/detail.aspx"),
            )
            .send()
            .await;

        let delay = match response {
            Ok(resp) if resp.status() == StatusCode::OK => {
                let decoded = match resp.bytes().await {
                    Ok(body) => serde_json::from_slice::<CardResponse>(&body)
                        .map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                match decoded {
                    Ok(card) => {
                        crate::metrics::scrape_attempt("wildberries", attempt, "ok");
                        return Ok(card);
                    }
                    Err(err) => {
                        crate::metrics::scrape_attempt("wildberries", attempt, "bad_body");
                        warn!(target = "marketbot.scrape", error = %err, attempt, "wb_card_body_unreadable");
                        jittered_delay(config, 2.0..=5.0)
                    }
                }
            }
            Ok(resp) => {
                crate::metrics::scrape_attempt("wildberries", attempt, "http_error");
                warn!(
                    target = "marketbot.scrape",
                    status = resp.status().as_u16(),
                    attempt,
                    "wb_card_bad_status"
                );
                jittered_delay(config, 1.0..=3.0)
            }
            Err(err) => {
                crate::metrics::scrape_attempt("wildberries", attempt, "network_error");
                warn!(target = "marketbot.scrape", error = %err, attempt, "wb_card_request_failed");
                jittered_delay(config, 2.0..=5.0)
            }
        };

        if attempt < attempts {
            pause(delay).await;
        }
    }
    Err(ScrapeError::RetriesExhausted { attempts })
}

pub fn parse_card(card: CardResponse, url: &str) -> Result<ProductInfo, ScrapeError> {
    let product = card
        .data
        .and_then(|data| data.products.into_iter().next())
        .ok_or(ScrapeError::NotFound)?;

    let price = product
        .sale_price_u
        .or(product.price_u)
        .map(Money::from_kopecks)
        .ok_or(ScrapeError::MissingPrice)?;

    let available_sizes = product
        .sizes
        .into_iter()
        .filter_map(|size| {
            let name = size.name.filter(|n| !n.trim().is_empty())?;
            Some(SizeOption {
                name,
                orig_name: size.orig_name.filter(|n| !n.trim().is_empty()),
                colors: size
                    .colors
                    .into_iter()
                    .filter_map(|color| color.name)
                    .filter(|name| !name.trim().is_empty())
                    .collect(),
            })
        })
        .collect();

    Ok(ProductInfo {
        marketplace: Marketplace::Wildberries,
        external_id: product.id.map(|id| id.to_string()),
        title: product
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Untitled product".to_string()),
        description: product.description.filter(|d| !d.trim().is_empty()),
        price,
        currency: "RUB".to_string(),
        image_url: None,
        url: url.to_string(),
        brand: product.brand.filter(|b| !b.trim().is_empty()),
        available_sizes,
    })
}
