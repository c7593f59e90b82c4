use super::{ProductInfo, ScrapeError};
use crate::marketplace::Marketplace;
use tracing::info;

// Ozon serves product data only to its own clients behind an anti-bot gate;
// links are recognised but not scraped.
pub async fn fetch(url: &str) -> Result<ProductInfo, ScrapeError> {
    info!(target = "marketbot.scrape", %url, "ozon_link_rejected");
    Err(ScrapeError::Unsupported(Marketplace::Ozon))
}
