use super::models::{OrderItemRow, OrderRow};
use super::{
    Order, OrderItem, OrderStatus, PRODUCT_COLUMNS, PaymentMethod, Store, StoreError,
    StoreResult, user_pk,
};
use crate::money::Money;
use chrono::Utc;
use tracing::{info, warn};

const ORDER_COLUMNS: &str = "o.id, u.user_id AS user_id, o.total_amount, o.delivery_address, \
     o.delivery_time, o.payment_method, o.status, o.created_at, o.updated_at";

#[derive(sqlx::FromRow)]
struct CheckoutLine {
    product_id: i64,
    quantity: i64,
    size: Option<String>,
    color: Option<String>,
    price: i64,
}

impl Store {
    /// Moves the whole cart into a new `new` order with a price snapshot and
    /// empties the cart. Either everything is written or nothing is.
    pub async fn create_order(
        &self,
        user_id: i64,
        delivery_address: &str,
        delivery_time: Option<&str>,
        payment_method: Option<PaymentMethod>,
    ) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let owner = user_pk(&mut *tx, user_id).await?;

        let lines = sqlx::query_as::<_, CheckoutLine>(
            "SELECT c.product_id, c.quantity, c.size, c.color, p.price \
             FROM cart_items c JOIN products p ON p.id = c.product_id \
             WHERE c.user_id = ? ORDER BY c.id",
        )
        .bind(owner)
        .fetch_all(&mut *tx)
        .await?;
        if lines.is_empty() {
            return Err(StoreError::EmptyCart);
        }

        let total: Money = lines
            .iter()
            .map(|line| Money::from_kopecks(line.price.saturating_mul(line.quantity)))
            .sum();
        let now = Utc::now();
        let order_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO orders \
             (user_id, total_amount, delivery_address, delivery_time, payment_method, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(owner)
        .bind(total.kopecks())
        .bind(delivery_address)
        .bind(delivery_time)
        .bind(payment_method.map(|m| m.as_str()))
        .bind(OrderStatus::New.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for line in &lines {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, quantity, price, size, color) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.price)
            .bind(&line.size)
            .bind(&line.color)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            target = "marketbot.store",
            user_id,
            order_id,
            items = lines.len(),
            total = %total,
            "order_created"
        );
        self.get_order(order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))
    }

    /// Orders of a user, newest first.
    pub async fn get_orders(&self, user_id: i64) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o JOIN users u ON u.id = o.user_id \
             WHERE u.user_id = ? ORDER BY o.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items = self.order_items(row.id).await?;
            orders.push(row.into_order(items)?);
        }
        Ok(orders)
    }

    pub async fn get_order(&self, order_id: i64) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o JOIN users u ON u.id = o.user_id WHERE o.id = ?"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let items = self.order_items(row.id).await?;
                Ok(Some(row.into_order(items)?))
            }
            None => Ok(None),
        }
    }

    async fn order_items(&self, order_id: i64) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT oi.id AS item_id, oi.quantity, oi.price AS unit_price, oi.size, oi.color, \
             {PRODUCT_COLUMNS} \
             FROM order_items oi JOIN products p ON p.id = oi.product_id \
             WHERE oi.order_id = ? ORDER BY oi.id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderItem::try_from).collect()
    }

    /// Cancels the user's own order while it is still `new` or `paid`.
    pub async fn cancel_order(&self, user_id: i64, order_id: i64) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND user_id = (SELECT id FROM users WHERE user_id = ?) \
             AND status IN ('new', 'paid')",
        )
        .bind(Utc::now())
        .bind(order_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        let cancelled = updated.rows_affected() > 0;
        if cancelled {
            info!(target = "marketbot.store", user_id, order_id, "order_cancelled");
        } else {
            warn!(target = "marketbot.store", user_id, order_id, "order_cancel_refused");
        }
        Ok(cancelled)
    }

    /// The owner reports payment: `new → paid`.
    pub async fn confirm_payment(&self, user_id: i64, order_id: i64) -> StoreResult<Order> {
        match self.get_order(order_id).await? {
            Some(order) if order.user_id == user_id => {
                self.set_status(order_id, OrderStatus::Paid).await
            }
            _ => Err(StoreError::NotFound(format!("order {order_id}"))),
        }
    }

    /// Moves an order along the status graph; the update is guarded by the
    /// status read beforehand so concurrent moves cannot skip a step.
    pub async fn set_status(&self, order_id: i64, next: OrderStatus) -> StoreResult<Order> {
        let order = self
            .get_order(order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        let invalid = StoreError::InvalidTransition {
            order_id,
            from: order.status,
            to: next,
        };
        if !order.status.can_transition_to(next) {
            return Err(invalid);
        }
        let updated = sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(order_id)
        .bind(order.status.as_str())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(invalid);
        }
        info!(
            target = "marketbot.store",
            order_id,
            from = order.status.as_str(),
            to = next.as_str(),
            "order_status_changed"
        );
        self.get_order(order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))
    }
}
