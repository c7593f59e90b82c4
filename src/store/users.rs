use super::{NewUser, Store, StoreError, StoreResult, User};
use chrono::Utc;
use tracing::info;

const USER_COLUMNS: &str =
    "id, user_id, username, first_name, last_name, phone, created_at, updated_at";

impl Store {
    pub async fn get_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Inserts the user; an existing row for the same chat id is returned as is.
    pub async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(new.user_id)
        .bind(&new.username)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(target = "marketbot.store", user_id = new.user_id, "user_created");
        }
        self.get_user(new.user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", new.user_id)))
    }

    /// Returns the user, creating a bare record on first contact. The flag
    /// is `true` when the row was created by this call.
    pub async fn ensure_user(
        &self,
        user_id: i64,
        username: Option<&str>,
    ) -> StoreResult<(User, bool)> {
        if let Some(user) = self.get_user(user_id).await? {
            return Ok((user, false));
        }
        let user = self
            .create_user(NewUser {
                user_id,
                username: username.map(str::to_string),
                ..NewUser::default()
            })
            .await?;
        Ok((user, true))
    }

    pub async fn update_user_name(&self, user_id: i64, first_name: &str) -> StoreResult<User> {
        self.update_user_field(user_id, "first_name", first_name).await
    }

    pub async fn update_user_phone(&self, user_id: i64, phone: &str) -> StoreResult<User> {
        self.update_user_field(user_id, "phone", phone).await
    }

    async fn update_user_field(
        &self,
        user_id: i64,
        column: &'static str,
        value: &str,
    ) -> StoreResult<User> {
        let updated = sqlx::query(&format!(
            "UPDATE users SET {column} = ?, updated_at = ? WHERE user_id = ?"
        ))
        .bind(value)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        self.get_user(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }
}
