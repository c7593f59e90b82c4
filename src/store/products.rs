use super::models::ProductRow;
use super::{PRODUCT_COLUMNS, Product, Store, StoreError, StoreResult};
use crate::scrape::ProductInfo;
use chrono::Utc;
use tracing::debug;

impl Store {
    /// Persists a scraped product snapshot. Each scrape gets its own row so
    /// cart lines keep the price the user saw.
    pub async fn create_product(&self, info: &ProductInfo) -> StoreResult<Product> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO products \
             (marketplace, external_id, title, description, price, currency, image_url, url, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(info.marketplace.as_str())
        .bind(&info.external_id)
        .bind(&info.title)
        .bind(&info.description)
        .bind(info.price.kopecks())
        .bind(&info.currency)
        .bind(&info.image_url)
        .bind(&info.url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        debug!(target = "marketbot.store", product_id = id, marketplace = info.marketplace.as_str(), "product_saved");
        self.get_product(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))
    }

    pub async fn get_product(&self, product_id: i64) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Product::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::Marketplace;
    use crate::money::Money;
    use crate::store::testing::product_info;

    #[tokio::test]
    async fn product_round_trips_through_sqlite() {
        let store = Store::in_memory().await.expect("store");
        let saved = store
            .create_product(&product_info("Hoodie", 219900))
            .await
            .expect("save");
        assert_eq!(saved.marketplace, Marketplace::Wildberries);
        assert_eq!(saved.price, Money(219900));
        assert_eq!(saved.external_id.as_deref(), Some("194573148"));
        let loaded = store.get_product(saved.id).await.expect("load");
        assert_eq!(loaded, Some(saved));
        assert_eq!(store.get_product(999).await.expect("load"), None);
    }

    #[tokio::test]
    async fn unknown_marketplace_is_corrupt() {
        let store = Store::in_memory().await.expect("store");
        let saved = store
            .create_product(&product_info("Hoodie", 100))
            .await
            .expect("save");
        sqlx::query("UPDATE products SET marketplace = 'aliexpress' WHERE id = ?")
            .bind(saved.id)
            .execute(store.pool())
            .await
            .expect("tamper");
        assert!(matches!(
            store.get_product(saved.id).await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
