use super::models::CartRow;
use super::{CartLine, PRODUCT_COLUMNS, Store, StoreError, StoreResult, user_pk};
use crate::money::Money;
use chrono::Utc;
use tracing::info;

impl Store {
    /// Cart lines of a user in insertion order. Unknown users have an empty cart.
    pub async fn get_cart_items(&self, user_id: i64) -> StoreResult<Vec<CartLine>> {
        let rows = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT c.id AS line_id, c.quantity, c.size, c.color, {PRODUCT_COLUMNS} \
             FROM cart_items c \
             JOIN users u ON u.id = c.user_id \
             JOIN products p ON p.id = c.product_id \
             WHERE u.user_id = ? ORDER BY c.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CartLine::try_from).collect()
    }

    /// Adds a line, merging into an existing row with the same product,
    /// size and color. Returns the id of the affected cart row.
    pub async fn add_to_cart(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: u32,
        size: Option<&str>,
        color: Option<&str>,
    ) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;
        let owner = user_pk(&mut *tx, user_id).await?;
        let product_exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_one(&mut *tx)
                .await?;
        if product_exists == 0 {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }

        let now = Utc::now();
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM cart_items \
             WHERE user_id = ? AND product_id = ? AND size IS ? AND color IS ?",
        )
        .bind(owner)
        .bind(product_id)
        .bind(size)
        .bind(color)
        .fetch_optional(&mut *tx)
        .await?;

        let line_id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE cart_items SET quantity = quantity + ?, updated_at = ? WHERE id = ?",
                )
                .bind(i64::from(quantity))
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO cart_items \
                     (user_id, product_id, quantity, size, color, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                )
                .bind(owner)
                .bind(product_id)
                .bind(i64::from(quantity))
                .bind(size)
                .bind(color)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;
        info!(
            target = "marketbot.store",
            user_id,
            product_id,
            quantity,
            line_id,
            merged = existing.is_some(),
            "cart_line_added"
        );
        Ok(line_id)
    }

    /// Deletes a cart row if it belongs to the user.
    pub async fn remove_from_cart(&self, user_id: i64, cart_item_id: i64) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM cart_items \
             WHERE id = ? AND user_id = (SELECT id FROM users WHERE user_id = ?)",
        )
        .bind(cart_item_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(deleted.rows_affected() > 0)
    }

    pub async fn cart_total(&self, user_id: i64) -> StoreResult<Money> {
        let lines = self.get_cart_items(user_id).await?;
        Ok(lines.iter().map(CartLine::line_total).sum())
    }
}
