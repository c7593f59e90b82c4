use super::StoreError;
use crate::marketplace::Marketplace;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// Chat-platform user id.
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub marketplace: Marketplace,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub price: Money,
    pub currency: String,
    pub image_url: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProductRow {
    pub id: i64,
    pub marketplace: String,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub currency: String,
    pub image_url: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let marketplace = row.marketplace.parse::<Marketplace>().map_err(|err| {
            StoreError::Corrupt(format!("product {}: {err}", row.id))
        })?;
        Ok(Product {
            id: row.id,
            marketplace,
            external_id: row.external_id,
            title: row.title,
            description: row.description,
            price: Money::from_kopecks(row.price),
            currency: row.currency,
            image_url: row.image_url,
            url: row.url,
            created_at: row.created_at,
        })
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLine {
    pub id: i64,
    pub product: Product,
    pub quantity: u32,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl CartLine {
    pub fn line_total(&self) -> Money {
        self.product.price.times(self.quantity)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CartRow {
    pub line_id: i64,
    pub quantity: i64,
    pub size: Option<String>,
    pub color: Option<String>,
    #[sqlx(flatten)]
    pub product: ProductRow,
}

impl TryFrom<CartRow> for CartLine {
    type Error = StoreError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        Ok(CartLine {
            id: row.line_id,
            quantity: quantity(row.quantity, "cart item", row.line_id)?,
            product: row.product.try_into()?,
            size: row.size,
            color: row.color,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(OrderStatus::New),
            "paid" => Some(OrderStatus::Paid),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OrderStatus::New => "Awaiting payment",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::Paid)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::New, OrderStatus::Paid)
                | (OrderStatus::Paid, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (OrderStatus::New | OrderStatus::Paid, OrderStatus::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mir,
    VisaMc,
    Apple,
    Google,
    Card,
}

impl PaymentMethod {
    pub const OFFERED: [PaymentMethod; 2] = [PaymentMethod::Mir, PaymentMethod::VisaMc];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mir => "mir",
            PaymentMethod::VisaMc => "visa_mc",
            PaymentMethod::Apple => "apple",
            PaymentMethod::Google => "google",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mir" => Some(PaymentMethod::Mir),
            "visa_mc" => Some(PaymentMethod::VisaMc),
            "apple" => Some(PaymentMethod::Apple),
            "google" => Some(PaymentMethod::Google),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::Mir => "MIR card",
            PaymentMethod::VisaMc => "VISA/MASTERCARD",
            PaymentMethod::Apple => "Apple Pay",
            PaymentMethod::Google => "Google Pay",
            PaymentMethod::Card => "Bank card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: i64,
    pub product: Product,
    pub quantity: u32,
    /// Unit price captured at checkout.
    pub price: Money,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Money {
        self.price.times(self.quantity)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderItemRow {
    pub item_id: i64,
    pub quantity: i64,
    #[sqlx(rename = "unit_price")]
    pub price: i64,
    pub size: Option<String>,
    pub color: Option<String>,
    #[sqlx(flatten)]
    pub product: ProductRow,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(OrderItem {
            id: row.item_id,
            quantity: quantity(row.quantity, "order item", row.item_id)?,
            price: Money::from_kopecks(row.price),
            product: row.product.try_into()?,
            size: row.size,
            color: row.color,
        })
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    /// Chat-platform user id of the owner.
    pub user_id: i64,
    pub total_amount: Money,
    pub delivery_address: String,
    pub delivery_time: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub total_amount: i64,
    pub delivery_address: String,
    pub delivery_time: Option<String>,
    pub payment_method: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("order {} has status {:?}", self.id, self.status))
        })?;
        let payment_method = match self.payment_method.as_deref() {
            None => None,
            Some(raw) => Some(PaymentMethod::parse(raw).ok_or_else(|| {
                StoreError::Corrupt(format!("order {} has payment method {raw:?}", self.id))
            })?),
        };
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            total_amount: Money::from_kopecks(self.total_amount),
            delivery_address: self.delivery_address,
            delivery_time: self.delivery_time,
            payment_method,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

fn quantity(raw: i64, what: &str, id: i64) -> Result<u32, StoreError> {
    u32::try_from(raw)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| StoreError::Corrupt(format!("{what} {id} has quantity {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_orders_are_cancellable() {
        assert!(OrderStatus::New.is_cancellable());
        assert!(OrderStatus::Paid.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn status_graph() {
        use OrderStatus::*;
        assert!(New.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Paid.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(New));
        assert!(!New.can_transition_to(Shipped));
        assert!(!Cancelled.can_transition_to(Paid));
    }

    #[test]
    fn payment_method_codes() {
        for method in [
            PaymentMethod::Mir,
            PaymentMethod::VisaMc,
            PaymentMethod::Apple,
            PaymentMethod::Google,
            PaymentMethod::Card,
        ] {
            assert_eq!(PaymentMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(PaymentMethod::parse("cash"), None);
        assert_eq!(
            serde_json::to_string(&PaymentMethod::VisaMc).expect("json"),
            "\"visa_mc\""
        );
    }
}
