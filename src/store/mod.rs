//! SQLite persistence for users, scraped products, carts and orders.
//!
//! Every public operation runs in its own transaction or single statement;
//! checkout (`create_order`) is the only multi-statement write.

mod cart;
pub mod models;
mod orders;
mod products;
mod users;

pub use models::{
    CartLine, NewUser, Order, OrderItem, OrderStatus, PaymentMethod, Product, User,
};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("cart is empty")]
    EmptyCart,
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(target = "marketbot.store", url = database_url, "database_connected");
        Self::migrate(pool).await
    }

    /// Private in-memory database, used by tests and ephemeral runs.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // one connection that never recycles, otherwise the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(target = "marketbot.store", "migrations_applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Internal row id for a chat user.
async fn user_pk<'e, E>(executor: E, user_id: i64) -> StoreResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
}

const PRODUCT_COLUMNS: &str = "p.id, p.marketplace, p.external_id, p.title, p.description, \
     p.price, p.currency, p.image_url, p.url, p.created_at";

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::marketplace::Marketplace;
    use crate::money::Money;
    use crate::scrape::{ProductInfo, SizeOption};

    pub fn product_info(title: &str, kopecks: i64) -> ProductInfo {
        ProductInfo {
            marketplace: Marketplace::Wildberries,
            external_id: Some("194573148".into()),
            title: title.into(),
            description: None,
            price: Money(kopecks),
            currency: "RUB".into(),
            image_url: None,
            url: "https://www.wildberries.ru/catalog/194573148/detail.aspx".into(),
            brand: None,
            available_sizes: vec![SizeOption {
                name: "M".into(),
                orig_name: Some("48".into()),
                colors: vec!["black".into()],
            }],
        }
    }

    pub async fn store_with_user(user_id: i64) -> Store {
        let store = Store::in_memory().await.expect("in-memory store");
        store
            .create_user(NewUser {
                user_id,
                username: Some("buyer".into()),
                ..NewUser::default()
            })
            .await
            .expect("create user");
        store
    }
}
