use super::{ProductInfo, ScrapeError, jittered_delay, pause, random_user_agent};
use crate::config::ScraperConfig;
use crate::marketplace::Marketplace;
use crate::money::Money;
use once_cell::sync::Lazy;
use reqwest::{Client, Url, header};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

const CAPTCHA_MARKER: &str = "Подтвердите, что запросы отправляли вы";
const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

static TITLE: Lazy<Selector> = Lazy::new(|| selector("h1"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));

static IMAGE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        ".cia-cs img",
        ".n-gallery__image",
        "img._2gUfn",
        r#"img[src*="marketpic"]"#,
        "img.preview-picture",
        r#"img[src*="thumbnail"]"#,
        ".image img",
        "img.logo-image",
        "img.image",
        r#"img[data-tid="bb42d11f"]"#,
    ])
});

static DISCOUNT_PRICE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"span[data-auto="offer-price-value"]"#,
        ".Price-root_discount",
        "span.Price_role_discount",
        "span._3NaXx._33ZFz",
        r#"span[data-auto="price-value"].Price_discount"#,
        r#"span[data-tid="c3eacd93"].Price_discount"#,
    ])
});

static PRICE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"span[data-auto="price-value"]"#,
        ".price-value",
        ".price_value",
        "span._1f9xN",
        "span._3NaXx._3kWlK",
        r#"div[data-tid="c3eacd93"]"#,
        r#"span[data-auto="mainPrice"]"#,
    ])
});

static DESCRIPTION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"div[data-auto="product-description"]"#,
        ".n-product-description-text",
        r#"div[data-tid="eee60a47"]"#,
        "div.specifications-tab",
    ])
});

fn selector(raw: &str) -> Selector {
    Selector::parse(raw).expect("static css selector")
}

fn selectors(raw: &[&str]) -> Vec<Selector> {
    raw.iter().map(|s| selector(s)).collect()
}

pub fn is_captcha(html: &str) -> bool {
    html.contains(CAPTCHA_MARKER)
}

pub async fn fetch(
    http: &Client,
    config: &ScraperConfig,
    url: &str,
) -> Result<ProductInfo, ScrapeError> {
    let attempts = config.max_retries.max(1);
    for attempt in 1..=attempts {
        let html = fetch_page(http, url).await?;
        if is_captcha(&html) {
            crate::metrics::scrape_attempt("yandex_market", attempt, "captcha");
            warn!(target = "marketbot.scrape", %url, attempt, "yandex_captcha");
            if attempt < attempts {
                pause(jittered_delay(config, 5.0..=10.0)).await;
            }
            continue;
        }
        crate::metrics::scrape_attempt("yandex_market", attempt, "ok");
        return parse_product_page(&html, url);
    }
    Err(ScrapeError::Captcha)
}

async fn fetch_page(http: &Client, url: &str) -> Result<String, ScrapeError> {
    debug!(target = "marketbot.scrape", %url, "yandex_page_request");
    let response = http
        .get(url)
        .header(header::USER_AGENT, random_user_agent())
        .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
        .send()
        .await
        .map_err(|err| ScrapeError::Network(err.to_string()))?;
    if !response.status().is_success() {
        return Err(ScrapeError::Http(response.status().as_u16()));
    }
    response
        .text()
        .await
        .map_err(|err| ScrapeError::Network(err.to_string()))
}

#[derive(Default)]
struct LdProduct {
    name: Option<String>,
    image: Option<String>,
    price: Option<Money>,
    description: Option<String>,
    brand: Option<String>,
}

pub fn parse_product_page(html: &str, url: &str) -> Result<ProductInfo, ScrapeError> {
    let document = Html::parse_document(html);

    let mut title = document
        .select(&TITLE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let ld = document
        .select(&JSON_LD)
        .filter_map(|script| serde_json::from_str::<Value>(&script.inner_html()).ok())
        .find_map(|value| find_product(&value).map(ld_product))
        .unwrap_or_default();

    if ld.name.is_some() {
        title = ld.name.clone();
    }

    let image_url = ld.image.or_else(|| first_image(&document));
    let price = ld
        .price
        .filter(|p| !p.is_zero())
        .or_else(|| first_price(&document, &DISCOUNT_PRICE_SELECTORS))
        .or_else(|| first_price(&document, &PRICE_SELECTORS))
        .ok_or(ScrapeError::MissingPrice)?;
    let description = ld.description.or_else(|| {
        DESCRIPTION_SELECTORS
            .iter()
            .find_map(|sel| document.select(sel).next())
            .map(element_text)
            .filter(|t| !t.is_empty())
    });

    Ok(ProductInfo {
        marketplace: Marketplace::YandexMarket,
        external_id: product_id_from_url(url),
        title: title.unwrap_or_else(|| "Untitled product".to_string()),
        description,
        price,
        currency: "RUB".to_string(),
        image_url,
        url: url.to_string(),
        brand: ld.brand,
        available_sizes: Vec::new(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if type_is_product(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_product)
        }
        _ => None,
    }
}

fn type_is_product(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

fn ld_product(value: &Value) -> LdProduct {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let image = match value.get("image") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => items.first().and_then(image_value),
        Some(other) => image_value(other),
        None => None,
    };
    let offers = match value.get("offers") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    let price = offers.and_then(|offers| {
        offers
            .get("lowPrice")
            .or_else(|| offers.get("price"))
            .and_then(price_value)
    });
    let brand = match value.get("brand") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    LdProduct {
        name: text("name"),
        image: image.filter(|s| !s.is_empty()),
        price,
        description: text("description"),
        brand,
    }
}

fn image_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("contentUrl"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn price_value(value: &Value) -> Option<Money> {
    match value {
        Value::Number(n) => n.as_f64().map(Money::from_rubles),
        Value::String(s) => parse_price_text(s),
        _ => None,
    }
}

fn first_image(document: &Html) -> Option<String> {
    IMAGE_SELECTORS.iter().find_map(|sel| {
        document.select(sel).find_map(|img| {
            let attrs = img.value();
            attrs
                .attr("src")
                .or_else(|| attrs.attr("data-src"))
                .map(str::to_string)
        })
    })
}

fn first_price(document: &Html, candidates: &[Selector]) -> Option<Money> {
    candidates.iter().find_map(|sel| {
        document
            .select(sel)
            .next()
            .and_then(|el| parse_price_text(&el.text().collect::<String>()))
    })
}

/// `"1 299,50 ₽"` → 1299.50 RUB. Digits and the decimal point are kept,
/// everything else is dropped. A stray point from an abbreviation such as
/// `"руб."` leaves an unparsable number, so the caller tries the next selector.
pub fn parse_price_text(raw: &str) -> Option<Money> {
    let cleaned: String = raw
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .map(Money::from_rubles)
        .filter(|money| !money.is_zero())
}

fn product_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_numeric = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .last()
        .map(str::to_string);
    last_numeric
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://market.yandex.ru/product--skovoroda-alwa-26/1045734577?sku=103807672220";

    #[test]
    fn json_ld_product_is_preferred() {
        let html = r#"
            <html><head>
            <script type="application/ld+json">{"@type":"BreadcrumbList","name":"nav"}</script>
            <script type="application/ld+json">
              {"@context":"https://schema.org","@type":"Product","name":"Сковорода ALWA 26 см",
               "image":["https://avatars.mds.yandex.net/get-mpic/1.jpeg","https://x/2.jpeg"],
               "brand":{"@type":"Brand","name":"ALWA"},
               "description":"Литая, с антипригарным покрытием",
               "offers":{"@type":"AggregateOffer","lowPrice":"1899","price":2499}}
            </script></head>
            <body><h1>Заголовок страницы</h1>
              <span data-auto="price-value">9 999 ₽</span>
            </body></html>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.title, "Сковорода ALWA 26 см");
        assert_eq!(product.price, Money(189900));
        assert_eq!(
            product.image_url.as_deref(),
            Some("https://avatars.mds.yandex.net/get-mpic/1.jpeg")
        );
        assert_eq!(product.brand.as_deref(), Some("ALWA"));
        assert_eq!(
            product.description.as_deref(),
            Some("Литая, с антипригарным покрытием")
        );
        assert_eq!(product.external_id.as_deref(), Some("1045734577"));
        assert_eq!(product.marketplace, Marketplace::YandexMarket);
        assert!(product.available_sizes.is_empty());
    }

    #[test]
    fn html_fallbacks_fill_missing_fields() {
        let html = r#"
            <html><body>
              <h1>  Чайник   электрический </h1>
              <div class="cia-cs"><img data-src="https://avatars.mds.yandex.net/kettle.jpg"></div>
              <span data-auto="price-value">2 490 ₽</span>
              <span data-auto="offer-price-value">1 990,50 ₽</span>
              <div data-auto="product-description"> Объём 1.7 л </div>
            </body></html>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.title, "Чайник электрический");
        assert_eq!(product.price, Money(199050), "discount price comes first");
        assert_eq!(
            product.image_url.as_deref(),
            Some("https://avatars.mds.yandex.net/kettle.jpg")
        );
        assert_eq!(product.description.as_deref(), Some("Объём 1.7 л"));
    }

    #[test]
    fn regular_price_when_no_discount() {
        let html = r#"<h1>Лампа</h1><span data-auto="mainPrice">749 ₽</span>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.price, Money(74900));
        assert!(product.image_url.is_none());
    }

    #[test]
    fn abbreviated_currency_falls_through_to_next_selector() {
        let html = r#"<h1>Лампа</h1>
            <span data-auto="offer-price-value">99,90 руб.</span>
            <span data-auto="mainPrice">749 ₽</span>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.price, Money(74900));
    }

    #[test]
    fn page_without_price_is_rejected() {
        let html = "<html><body><h1>Без цены</h1></body></html>";
        assert!(matches!(
            parse_product_page(html, URL),
            Err(ScrapeError::MissingPrice)
        ));
    }

    #[test]
    fn broken_json_ld_is_ignored() {
        let html = r#"<script type="application/ld+json">{not json</script>
            <h1>Товар</h1><span class="price-value">100</span>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.title, "Товар");
        assert_eq!(product.price, Money(10000));
    }

    #[test]
    fn graph_and_offer_arrays_are_understood() {
        let html = r#"<script type="application/ld+json">
            {"@graph":[{"@type":"WebPage"},{"@type":["Product"],"name":"Кружка",
              "image":{"url":"https://img/cup.png"},"offers":[{"price":"349.00"}]}]}
            </script>"#;
        let product = parse_product_page(html, URL).expect("parse");
        assert_eq!(product.title, "Кружка");
        assert_eq!(product.price, Money(34900));
        assert_eq!(product.image_url.as_deref(), Some("https://img/cup.png"));
    }

    #[test]
    fn captcha_marker_detected() {
        let html = "<html><body><h1>Подтвердите, что запросы отправляли вы, а не робот</h1></body></html>";
        assert!(is_captcha(html));
        assert!(!is_captcha("<h1>Товар</h1>"));
    }

    #[test]
    fn price_text_normalization() {
        assert_eq!(parse_price_text("1\u{a0}299 ₽"), Some(Money(129900)));
        assert_eq!(parse_price_text("от 99,90 ₽"), Some(Money(9990)));
        assert_eq!(parse_price_text("от 99,90 руб."), None);
        assert_eq!(parse_price_text("₽"), None);
        assert_eq!(parse_price_text("0"), None);
    }
}
