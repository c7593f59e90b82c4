use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

static URL_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("static url regex"));

static WILDBERRIES_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(www\.)?wildberries\.ru/").expect("static wb regex"));

static OZON_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(www\.)?ozon\.ru/").expect("static ozon regex"));

static YANDEX_MARKET_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://market\.yandex\.ru/").expect("static yandex regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Wildberries,
    Ozon,
    YandexMarket,
}

impl Marketplace {
    pub const ALL: [Marketplace; 3] = [
        Marketplace::Wildberries,
        Marketplace::Ozon,
        Marketplace::YandexMarket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Wildberries => "wildberries",
            Marketplace::Ozon => "ozon",
            Marketplace::YandexMarket => "yandex_market",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Marketplace::Wildberries => "Wildberries",
            Marketplace::Ozon => "Ozon",
            Marketplace::YandexMarket => "Yandex Market",
        }
    }

    fn host_marker(&self) -> &'static str {
        match self {
            Marketplace::Wildberries => "wildberries.ru",
            Marketplace::Ozon => "ozon.ru",
            Marketplace::YandexMarket => "market.yandex.ru",
        }
    }

    fn strict_pattern(&self) -> &'static Regex {
        match self {
            Marketplace::Wildberries => &WILDBERRIES_URL,
            Marketplace::Ozon => &OZON_URL,
            Marketplace::YandexMarket => &YANDEX_MARKET_URL,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown marketplace {0:?}")]
pub struct UnknownMarketplace(pub String);

impl FromStr for Marketplace {
    type Err = UnknownMarketplace;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "wildberries" => Ok(Marketplace::Wildberries),
            "ozon" => Ok(Marketplace::Ozon),
            "yandex_market" => Ok(Marketplace::YandexMarket),
            _ => Err(UnknownMarketplace(input.to_string())),
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// First `http(s)://` token inside free text.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_IN_TEXT.find(text).map(|m| m.as_str())
}

fn candidate(text: &str) -> &str {
    extract_url(text).unwrap_or_else(|| text.trim())
}

pub fn identify(text: &str) -> Option<Marketplace> {
    let url = candidate(text);
    Marketplace::ALL
        .into_iter()
        .find(|marketplace| url.contains(marketplace.host_marker()))
}

pub fn is_valid_marketplace_url(text: &str) -> bool {
    let url = candidate(text);
    identify(url)
        .map(|marketplace| marketplace.strict_pattern().is_match(url))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_names_parse_back() {
        for marketplace in Marketplace::ALL {
            assert_eq!(marketplace.as_str().parse::<Marketplace>(), Ok(marketplace));
        }
        assert_eq!(" Ozon ".parse::<Marketplace>(), Ok(Marketplace::Ozon));
        assert_eq!(
            "aliexpress".parse::<Marketplace>(),
            Err(UnknownMarketplace("aliexpress".to_string()))
        );
    }

    #[test]
    fn classifies_each_marketplace() {
        assert_eq!(
            identify("https://www.wildberries.ru/catalog/194573148/detail.aspx?targetUrl=SG"),
            Some(Marketplace::Wildberries)
        );
        assert_eq!(
            identify("https://www.ozon.ru/product/kurtka-123456/"),
            Some(Marketplace::Ozon)
        );
        assert_eq!(
            identify("https://market.yandex.ru/product--skovoroda/1045734577?sku=1"),
            Some(Marketplace::YandexMarket)
        );
        assert_eq!(identify("https://example.com/item/1"), None);
        assert_eq!(identify("no link here"), None);
    }

    #[test]
    fn classification_is_deterministic() {
        let inputs = [
            "https://www.wildberries.ru/catalog/1/detail.aspx",
            "look at https://ozon.ru/product/x please",
            "https://market.yandex.ru/product/2",
            "https://shop.example.org",
        ];
        for input in inputs {
            let first = identify(input);
            for _ in 0..5 {
                assert_eq!(identify(input), first, "unstable for {input}");
            }
        }
    }

    #[test]
    fn extracts_url_from_surrounding_text() {
        let text = "хочу вот это https://www.wildberries.ru/catalog/42/detail.aspx спасибо";
        assert_eq!(
            extract_url(text),
            Some("https://www.wildberries.ru/catalog/42/detail.aspx")
        );
        assert_eq!(identify(text), Some(Marketplace::Wildberries));
        assert!(is_valid_marketplace_url(text));
    }

    #[test]
    fn strict_shape_rejects_lookalikes() {
        assert!(!is_valid_marketplace_url(
            "https://evil.example/?next=wildberries.ru"
        ));
        assert!(!is_valid_marketplace_url("https://yandex.ru/market.yandex.ru/x"));
        assert!(!is_valid_marketplace_url("ftp://market.yandex.ru/product/1"));
        assert!(is_valid_marketplace_url("http://wildberries.ru/catalog/1/detail.aspx"));
        assert!(is_valid_marketplace_url("https://market.yandex.ru/product/1"));
    }

    #[test]
    fn wildberries_wins_over_later_markers() {
        assert_eq!(
            identify("https://www.wildberries.ru/promo/ozon.ru"),
            Some(Marketplace::Wildberries)
        );
    }
}
